//! Structural integrity checks for captured frames.
//!
//! The validator is stateless: the orchestrator calls it once per capture
//! attempt and it only ever logs.

use crate::config::ValidationConfig;
use crate::frame::{hex_prefix, hex_suffix, Frame, FrameFormat, ValidatedFrame};
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons a frame is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidFrame {
    #[error("Frame too small: {len} bytes < minimum {min}")]
    TooSmall { len: usize, min: usize },

    #[error("Missing {format:?} start marker, got {found}")]
    MissingStartMarker { format: FrameFormat, found: String },

    #[error("Blank frame: {zeros} of the first {window} bytes are zero")]
    Blank { zeros: usize, window: usize },
}

/// Result of inspecting a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid,
    Invalid(InvalidFrame),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

/// Frame validator.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    min_frame_bytes: usize,
    probe_window: usize,
    max_zero_fraction: f64,
}

impl From<&ValidationConfig> for FrameValidator {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            min_frame_bytes: config.min_frame_bytes,
            probe_window: config.probe_window,
            max_zero_fraction: config.max_zero_fraction,
        }
    }
}

impl Default for FrameValidator {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl FrameValidator {
    /// Inspect a frame without taking ownership of it.
    pub fn inspect(&self, frame: &Frame) -> Verdict {
        match self.check(frame) {
            Ok(()) => Verdict::Valid,
            Err(reason) => Verdict::Invalid(reason),
        }
    }

    /// Validate a frame, consuming it. A rejected frame is dropped here.
    pub fn validate(&self, frame: Frame) -> Result<ValidatedFrame, InvalidFrame> {
        self.check(&frame)?;
        Ok(ValidatedFrame::new(frame))
    }

    fn check(&self, frame: &Frame) -> Result<(), InvalidFrame> {
        let data = frame.data();

        if data.len() < self.min_frame_bytes {
            return Err(InvalidFrame::TooSmall {
                len: data.len(),
                min: self.min_frame_bytes,
            });
        }

        if let Some(marker) = frame.format.start_marker() {
            if !data.starts_with(marker) {
                return Err(InvalidFrame::MissingStartMarker {
                    format: frame.format,
                    found: hex_prefix(data, marker.len()),
                });
            }
        }

        let window = &data[..data.len().min(self.probe_window)];
        if !window.is_empty() {
            let zeros = window.iter().filter(|&&b| b == 0).count();
            if zeros as f64 / window.len() as f64 > self.max_zero_fraction {
                return Err(InvalidFrame::Blank {
                    zeros,
                    window: window.len(),
                });
            }
        }

        if let Some(marker) = frame.format.end_marker() {
            if !data.ends_with(marker) {
                warn!(
                    sequence = frame.sequence,
                    bytes = data.len(),
                    tail = %hex_suffix(data, marker.len()),
                    "Frame is missing its end marker"
                );
            }
        }

        debug!(
            sequence = frame.sequence,
            bytes = data.len(),
            head = %hex_prefix(data, 4),
            "Frame validated"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_frame(len: usize) -> Frame {
        let mut data = vec![0x55u8; len];
        data[..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        let n = data.len();
        data[n - 2..].copy_from_slice(&[0xFF, 0xD9]);
        Frame::new(data, 1600, 1200, FrameFormat::Jpeg)
    }

    #[test]
    fn test_valid_jpeg() {
        let validator = FrameValidator::default();
        assert_eq!(validator.inspect(&jpeg_frame(5000)), Verdict::Valid);
    }

    #[test]
    fn test_frames_below_threshold_are_invalid() {
        let validator = FrameValidator::default();
        for len in [4usize, 10, 500, 999] {
            assert!(matches!(
                validator.inspect(&jpeg_frame(len)),
                Verdict::Invalid(InvalidFrame::TooSmall { min: 1000, .. })
            ));
        }
        let empty = Frame::new(Vec::new(), 0, 0, FrameFormat::Rgb565);
        assert!(!validator.inspect(&empty).is_valid());
    }

    #[test]
    fn test_wrong_start_marker_is_invalid() {
        let validator = FrameValidator::default();
        let prefixes: [[u8; 3]; 5] = [
            [0x00, 0xD8, 0xFF],
            [0xFF, 0x00, 0xFF],
            [0xFF, 0xD8, 0x00],
            [0x89, 0x50, 0x4E],
            [0xD8, 0xFF, 0xFF],
        ];
        for prefix in prefixes {
            let mut data = vec![0x55u8; 2000];
            data[..3].copy_from_slice(&prefix);
            let frame = Frame::new(data, 1, 1, FrameFormat::Jpeg);
            match validator.inspect(&frame) {
                Verdict::Invalid(InvalidFrame::MissingStartMarker { found, .. }) => {
                    assert_eq!(found, hex_prefix(&prefix, 3));
                }
                other => panic!("Expected MissingStartMarker, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_matching_marker_with_dense_content_is_valid() {
        let validator = FrameValidator::default();
        for fourth in [0xE0u8, 0xE1, 0xDB, 0x00] {
            let mut data = vec![0x10u8; 1500];
            data[..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, fourth]);
            let frame = Frame::new(data, 1, 1, FrameFormat::Jpeg);
            assert!(validator.inspect(&frame).is_valid());
        }
    }

    #[test]
    fn test_blank_frame_is_invalid() {
        let validator = FrameValidator::default();
        let mut data = vec![0u8; 5000];
        data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        let frame = Frame::new(data, 1, 1, FrameFormat::Jpeg);
        assert!(matches!(
            validator.inspect(&frame),
            Verdict::Invalid(InvalidFrame::Blank { zeros: 97, window: 100 })
        ));
    }

    #[test]
    fn test_zero_fraction_at_threshold_is_valid() {
        let validator = FrameValidator::default();
        let mut data = vec![0x11u8; 5000];
        data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        // exactly 80 zeros in the first 100 bytes
        for b in data[3..83].iter_mut() {
            *b = 0;
        }
        let frame = Frame::new(data, 1, 1, FrameFormat::Jpeg);
        assert!(validator.inspect(&frame).is_valid());
    }

    #[test]
    fn test_missing_end_marker_is_advisory() {
        let validator = FrameValidator::default();
        let mut data = vec![0x22u8; 3000];
        data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        let frame = Frame::new(data, 1, 1, FrameFormat::Jpeg);
        assert!(validator.validate(frame).is_ok());
    }

    #[test]
    fn test_raw_format_skips_marker_check() {
        let validator = FrameValidator::default();
        let frame = Frame::new(vec![0x40u8; 4096], 64, 32, FrameFormat::Rgb565);
        assert!(validator.inspect(&frame).is_valid());
    }

    #[test]
    fn test_validation_is_stateless() {
        let validator = FrameValidator::default();
        let small = jpeg_frame(200);
        let first = validator.inspect(&small);
        assert!(validator.inspect(&jpeg_frame(5000)).is_valid());
        assert_eq!(validator.inspect(&small), first);
    }

    #[test]
    fn test_custom_thresholds() {
        let validator = FrameValidator::from(&ValidationConfig {
            min_frame_bytes: 10,
            probe_window: 8,
            max_zero_fraction: 0.5,
        });
        let frame = Frame::new(vec![1u8; 12], 1, 1, FrameFormat::Grayscale);
        assert!(validator.validate(frame).is_ok());
    }
}
