//! Delivery orchestrator.
//!
//! Drives one capture cycle at a time through
//! `Idle -> Capturing -> Validating -> (Persisting) -> Uploading -> Recording -> Idle`.
//! Capture and validation failures are retried locally with a bounded policy;
//! the network call is never retried within a cycle.

use crate::accounting::{Accounting, AccountingSnapshot, DeliveryAttempt};
use crate::config::ScheduleConfig;
use crate::durable_stage::DurableStore;
use crate::frame::ValidatedFrame;
use crate::retry::RetryPolicy;
use crate::sensor::Sensor;
use crate::uploader::{UploadOutcome, UploadSource, Uploader};
use crate::validator::FrameValidator;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Stage the pipeline is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Validating,
    Persisting,
    Uploading,
    Recording,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Capturing => "capturing",
            PipelineState::Validating => "validating",
            PipelineState::Persisting => "persisting",
            PipelineState::Uploading => "uploading",
            PipelineState::Recording => "recording",
        };
        f.write_str(name)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// No valid frame within the attempt bound; nothing was sent or recorded
    Abandoned { attempts: u32, last_error: String },
    /// Link down; nothing was sent or recorded
    Skipped { bytes: usize },
    /// One upload attempt was made and recorded
    Delivered {
        outcome: UploadOutcome,
        bytes: usize,
        duration: Duration,
        persisted: bool,
    },
}

/// Timer settings of the run loop.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub cadence: Duration,
    pub diagnostics: Duration,
    pub post_attempt_idle: Duration,
}

impl From<&ScheduleConfig> for Schedule {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            cadence: config.cadence(),
            diagnostics: config.diagnostics(),
            post_attempt_idle: config.post_attempt_idle(),
        }
    }
}

/// Owns every pipeline collaborator and the accounting state.
pub struct Orchestrator {
    device_id: String,
    sensor: Box<dyn Sensor>,
    validator: FrameValidator,
    durable: Option<Arc<dyn DurableStore>>,
    uploader: Uploader,
    retry: RetryPolicy,
    schedule: Schedule,
    accounting: Accounting,
    state: PipelineState,
    last_attempt: Option<DeliveryAttempt>,
}

impl Orchestrator {
    pub fn new(
        device_id: impl Into<String>,
        sensor: Box<dyn Sensor>,
        validator: FrameValidator,
        uploader: Uploader,
        retry: RetryPolicy,
        schedule: Schedule,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            sensor,
            validator,
            durable: None,
            uploader,
            retry,
            schedule,
            accounting: Accounting::new(),
            state: PipelineState::Idle,
            last_attempt: None,
        }
    }

    /// Persist frames before upload.
    pub fn with_durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn last_attempt(&self) -> Option<&DeliveryAttempt> {
        self.last_attempt.as_ref()
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }

    /// Run one complete cycle.
    #[instrument(skip(self), fields(device_id = %self.device_id))]
    pub async fn run_cycle(&mut self) -> CycleReport {
        let frame = match self.acquire().await {
            Ok(frame) => frame,
            Err((attempts, last_error)) => {
                warn!(attempts, error = %last_error, "Cycle abandoned, no valid frame");
                self.transition(PipelineState::Idle);
                return CycleReport::Abandoned {
                    attempts,
                    last_error,
                };
            }
        };

        let sequence = frame.frame().sequence;
        let source = self.persist(frame).await;
        let persisted = source.is_durable();

        self.transition(PipelineState::Uploading);
        let report = self.uploader.upload(source).await;

        let cycle = match report.outcome.attempt_outcome() {
            Some(outcome) => {
                self.transition(PipelineState::Recording);
                self.accounting
                    .record(outcome, report.duration, report.bytes);
                self.last_attempt = Some(DeliveryAttempt {
                    sequence,
                    bytes: report.bytes,
                    started_at: report.started_at,
                    ended_at: report.ended_at,
                    outcome,
                    status: report.outcome.status(),
                });
                CycleReport::Delivered {
                    outcome: report.outcome,
                    bytes: report.bytes,
                    duration: report.duration,
                    persisted,
                }
            }
            None => CycleReport::Skipped {
                bytes: report.bytes,
            },
        };

        if !self.schedule.post_attempt_idle.is_zero() {
            tokio::time::sleep(self.schedule.post_attempt_idle).await;
        }

        self.transition(PipelineState::Idle);
        cycle
    }

    /// Capture and validate until a frame passes or attempts run out.
    async fn acquire(&mut self) -> Result<ValidatedFrame, (u32, String)> {
        let mut backoff = self.retry.backoff();
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            self.transition(PipelineState::Capturing);
            match self.sensor.capture().await {
                Ok(frame) => {
                    self.transition(PipelineState::Validating);
                    let bytes = frame.len();
                    match self.validator.validate(frame) {
                        Ok(valid) => return Ok(valid),
                        Err(reason) => {
                            warn!(attempt, bytes, error = %reason, "Frame rejected");
                            last_error = reason.to_string();
                        }
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Capture failed");
                    last_error = e.to_string();
                }
            }

            if attempt < self.retry.max_attempts {
                let delay = backoff.next_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err((self.retry.max_attempts, last_error))
    }

    /// Pick the upload source, persisting first when a store is configured.
    async fn persist(&mut self, frame: ValidatedFrame) -> UploadSource {
        let Some(store) = self.durable.clone() else {
            return UploadSource::Memory(frame);
        };

        self.transition(PipelineState::Persisting);
        match store.persist(&frame).await {
            Ok(handle) => {
                debug!(path = %handle.path.display(), "Uploading from durable copy");
                UploadSource::Durable { handle, frame }
            }
            Err(e) => {
                warn!(error = %e, bytes = frame.len(), "Durable stage unavailable, uploading from memory");
                UploadSource::Memory(frame)
            }
        }
    }

    /// Log the accounting snapshot.
    pub fn report_diagnostics(&self) -> AccountingSnapshot {
        let snapshot = self.accounting.snapshot();
        info!(
            device_id = %self.device_id,
            attempts = snapshot.attempts,
            successes = snapshot.successes,
            failures = snapshot.failures,
            success_rate = format!("{:.1}", snapshot.success_rate),
            avg_duration_ms = snapshot.average_duration.as_millis() as u64,
            avg_bytes = snapshot.average_bytes,
            total_bytes = snapshot.total_bytes,
            last_status = self.last_attempt.as_ref().and_then(|a| a.status),
            "Delivery stats"
        );
        snapshot
    }

    /// Run cycles on the cadence until `shutdown` resolves.
    ///
    /// A cycle always runs to completion; the shutdown future is only
    /// observed between cycles.
    pub async fn run<F>(mut self, shutdown: F) -> Accounting
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let warm_up = self.sensor.warm_up();
        if !warm_up.is_zero() {
            info!(warm_up_ms = warm_up.as_millis() as u64, "Waiting for sensor to settle");
            tokio::select! {
                _ = &mut shutdown => return self.accounting,
                _ = tokio::time::sleep(warm_up) => {}
            }
        }

        let mut cadence = interval(self.schedule.cadence);
        cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut diagnostics = interval_at(
            Instant::now() + self.schedule.diagnostics,
            self.schedule.diagnostics,
        );
        diagnostics.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            device_id = %self.device_id,
            cadence_secs = self.schedule.cadence.as_secs(),
            diagnostics_secs = self.schedule.diagnostics.as_secs(),
            "Capture loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Capture loop stopping");
                    break;
                }
                _ = diagnostics.tick() => {
                    self.report_diagnostics();
                }
                _ = cadence.tick() => {
                    let report = self.run_cycle().await;
                    debug!(?report, "Cycle finished");
                }
            }
        }

        self.report_diagnostics();
        self.accounting
    }
}
