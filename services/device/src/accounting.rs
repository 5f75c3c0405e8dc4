//! Delivery accounting.
//!
//! Counters are only ever incremented; averages and rates are derived when a
//! snapshot is taken so they never drift from the totals.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Outcome of a delivery attempt as seen by accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

/// Record of one upload attempt.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Sequence number of the frame that was sent
    pub sequence: u64,
    /// Image bytes carried by the request
    pub bytes: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// HTTP status when a response was received
    pub status: Option<u16>,
}

impl DeliveryAttempt {
    /// Wall-clock duration; zero if the clock went backwards.
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Cumulative delivery statistics.
#[derive(Debug, Default, Clone)]
pub struct Accounting {
    attempts: u64,
    successes: u64,
    failures: u64,
    total_duration: Duration,
    total_bytes: u64,
}

/// Point-in-time view of [`Accounting`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountingSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Sum of all attempt durations
    pub total_duration: Duration,
    /// Bytes delivered by successful attempts
    pub total_bytes: u64,
    /// Percentage of attempts that succeeded
    pub success_rate: f64,
    /// Mean attempt duration
    pub average_duration: Duration,
    /// Mean size of a successful delivery
    pub average_bytes: u64,
}

impl Accounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed attempt.
    pub fn record(&mut self, outcome: AttemptOutcome, duration: Duration, bytes: usize) {
        self.attempts = self.attempts.saturating_add(1);
        self.total_duration = self.total_duration.saturating_add(duration);

        match outcome {
            AttemptOutcome::Success => {
                self.successes = self.successes.saturating_add(1);
                self.total_bytes = self.total_bytes.saturating_add(bytes as u64);
            }
            AttemptOutcome::RetryableFailure | AttemptOutcome::FatalFailure => {
                self.failures = self.failures.saturating_add(1);
            }
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Derive a snapshot. Does not mutate.
    pub fn snapshot(&self) -> AccountingSnapshot {
        let success_rate = if self.attempts > 0 {
            (self.successes as f64 / self.attempts as f64) * 100.0
        } else {
            0.0
        };
        let average_duration = if self.attempts > 0 {
            // u32 division keeps this on Duration; attempts past u32::MAX are clamped
            self.total_duration / self.attempts.min(u32::MAX as u64) as u32
        } else {
            Duration::ZERO
        };
        let average_bytes = if self.successes > 0 {
            self.total_bytes / self.successes
        } else {
            0
        };

        AccountingSnapshot {
            attempts: self.attempts,
            successes: self.successes,
            failures: self.failures,
            total_duration: self.total_duration,
            total_bytes: self.total_bytes,
            success_rate,
            average_duration,
            average_bytes,
        }
    }
}
