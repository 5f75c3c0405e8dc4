//! Configuration management for the camera device service.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::frame::FrameFormat;

/// Main configuration for the device service.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device identity
    pub device: IdentityConfig,

    /// Image sensor configuration
    pub sensor: SensorConfig,

    /// Network link monitoring
    #[serde(default)]
    pub link: LinkConfig,

    /// Frame validation thresholds
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Local durable storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload target configuration
    pub upload: UploadConfig,

    /// Capture cadence and diagnostics intervals
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Capture retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity reported in logs.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Device identifier
    pub id: String,
}

/// Kind of frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Replays image files from a directory
    Directory,
    /// Fetches a still image from a camera snapshot URL
    Snapshot,
}

/// Image sensor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// Frame source kind
    pub kind: SensorKind,

    /// Directory of images (directory sensor)
    #[serde(default)]
    pub path: Option<String>,

    /// Snapshot URL (snapshot sensor)
    #[serde(default)]
    pub url: Option<String>,

    /// Declared format of captured frames
    #[serde(default = "default_frame_format")]
    pub format: FrameFormat,

    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Delay after sensor initialization before the first capture
    #[serde(default = "default_warm_up_ms")]
    pub warm_up_ms: u64,

    /// Snapshot request timeout in seconds
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,
}

/// How link association is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Assume the link is always associated
    Always,
    /// Read the operational state of a network interface
    Interface,
    /// Open a TCP connection to the upload host
    TcpProbe,
}

/// Network link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_link_kind")]
    pub kind: LinkKind,

    /// Interface name (e.g., "wlan0")
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Probe address as host:port; derived from the upload URL when absent
    #[serde(default)]
    pub probe_address: Option<String>,

    /// Probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Frame validation thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Frames shorter than this are sensor glitches
    #[serde(default = "default_min_frame_bytes")]
    pub min_frame_bytes: usize,

    /// Number of leading bytes sampled by the blank-frame probe
    #[serde(default = "default_probe_window")]
    pub probe_window: usize,

    /// Maximum tolerated fraction of zero bytes in the probe window
    #[serde(default = "default_max_zero_fraction")]
    pub max_zero_fraction: f64,
}

/// Local durable storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Persist frames before upload
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,

    /// Root of the storage medium (e.g., an SD card mount)
    #[serde(default = "default_mount_root")]
    pub mount_root: String,

    /// Images directory relative to the mount root
    #[serde(default = "default_images_dir")]
    pub images_dir: String,

    /// Require the mount root to be a mount point
    #[serde(default)]
    pub require_mount_point: bool,
}

/// Upload target configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Full upload endpoint URL (e.g., "https://collector.example.com/upload")
    pub url: String,

    /// Multipart field carrying the image
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Filename declared in the multipart part
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Request timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,

    /// Maximum redirects followed per request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Bearer token sent as Authorization header
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Additional request headers
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

/// Cadence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Interval between capture cycles in seconds
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,

    /// Interval between diagnostics reports in seconds
    #[serde(default = "default_diagnostics_secs")]
    pub diagnostics_secs: u64,

    /// Idle period after every upload attempt in milliseconds
    #[serde(default = "default_post_attempt_idle_ms")]
    pub post_attempt_idle_ms: u64,
}

/// Capture retry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Capture attempts per cycle, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for the delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between delays (1.0 = fixed delay)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_frame_format() -> FrameFormat {
    FrameFormat::Jpeg
}
fn default_width() -> u32 {
    1600
}
fn default_height() -> u32 {
    1200
}
fn default_warm_up_ms() -> u64 {
    2000
}
fn default_snapshot_timeout() -> u64 {
    10
}
fn default_link_kind() -> LinkKind {
    LinkKind::Always
}
fn default_interface() -> String {
    "wlan0".to_string()
}
fn default_probe_timeout_ms() -> u64 {
    2000
}
fn default_min_frame_bytes() -> usize {
    1000
}
fn default_probe_window() -> usize {
    100
}
fn default_max_zero_fraction() -> f64 {
    0.8
}
fn default_storage_enabled() -> bool {
    true
}
fn default_mount_root() -> String {
    "/sdcard".to_string()
}
fn default_images_dir() -> String {
    "images".to_string()
}
fn default_field_name() -> String {
    "file".to_string()
}
fn default_filename() -> String {
    "image.jpg".to_string()
}
fn default_upload_timeout() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}
fn default_cadence_secs() -> u64 {
    60
}
fn default_diagnostics_secs() -> u64 {
    300
}
fn default_post_attempt_idle_ms() -> u64 {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    2000
}
fn default_multiplier() -> f64 {
    1.0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: default_link_kind(),
            interface: default_interface(),
            probe_address: None,
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_frame_bytes: default_min_frame_bytes(),
            probe_window: default_probe_window(),
            max_zero_fraction: default_max_zero_fraction(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            mount_root: default_mount_root(),
            images_dir: default_images_dir(),
            require_mount_point: false,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence_secs(),
            diagnostics_secs: default_diagnostics_secs(),
            post_attempt_idle_ms: default_post_attempt_idle_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DeviceConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Local config file (config/device.toml)
    /// 2. System config file (/etc/camlink/device.toml)
    /// 3. Environment variables (prefixed with DEVICE_)
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/device").required(false))
            .add_source(File::with_name("/etc/camlink/device").required(false))
            // e.g., DEVICE__UPLOAD__URL -> upload.url
            .add_source(
                Environment::with_prefix("DEVICE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.device.id.is_empty() {
            return Err(ConfigValidationError::MissingField("device.id".to_string()));
        }

        match self.sensor.kind {
            SensorKind::Directory if self.sensor.path.as_deref().unwrap_or("").is_empty() => {
                return Err(ConfigValidationError::MissingField(
                    "sensor.path".to_string(),
                ));
            }
            SensorKind::Snapshot if self.sensor.url.as_deref().unwrap_or("").is_empty() => {
                return Err(ConfigValidationError::MissingField("sensor.url".to_string()));
            }
            _ => {}
        }

        if self.upload.url.is_empty() {
            return Err(ConfigValidationError::MissingField("upload.url".to_string()));
        }
        if !self.upload.url.starts_with("http://") && !self.upload.url.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }
        if self.upload.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        if self.schedule.cadence_secs == 0 || self.schedule.diagnostics_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "schedule".to_string(),
                message: "Intervals must be greater than 0".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                message: "At least one capture attempt is required".to_string(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.multiplier".to_string(),
                message: "Multiplier must be at least 1.0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.validation.max_zero_fraction) {
            return Err(ConfigValidationError::InvalidValue {
                field: "validation.max_zero_fraction".to_string(),
                message: "Fraction must be between 0 and 1".to_string(),
            });
        }

        Ok(())
    }
}

impl SensorConfig {
    /// Get warm-up delay as Duration.
    pub fn warm_up(&self) -> Duration {
        Duration::from_millis(self.warm_up_ms)
    }

    /// Get snapshot request timeout as Duration.
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }
}

impl LinkConfig {
    /// Get probe timeout as Duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl UploadConfig {
    /// Get request timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ScheduleConfig {
    /// Get capture cadence as Duration.
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }

    /// Get diagnostics interval as Duration.
    pub fn diagnostics(&self) -> Duration {
        Duration::from_secs(self.diagnostics_secs)
    }

    /// Get post-attempt idle as Duration.
    pub fn post_attempt_idle(&self) -> Duration {
        Duration::from_millis(self.post_attempt_idle_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> DeviceConfig {
        DeviceConfig {
            device: IdentityConfig {
                id: "cam-001".to_string(),
            },
            sensor: SensorConfig {
                kind: SensorKind::Directory,
                path: Some("/var/lib/camlink/frames".to_string()),
                url: None,
                format: FrameFormat::Jpeg,
                width: 1600,
                height: 1200,
                warm_up_ms: 0,
                snapshot_timeout_secs: 10,
            },
            link: LinkConfig::default(),
            validation: ValidationConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig {
                url: "http://collector:8080/upload".to_string(),
                field_name: default_field_name(),
                filename: default_filename(),
                timeout_secs: 30,
                max_redirects: 5,
                bearer_token: None,
                extra_headers: HashMap::new(),
            },
            schedule: ScheduleConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_sensor_path() {
        let mut config = create_test_config();
        config.sensor.path = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(field)) if field == "sensor.path"
        ));
    }

    #[test]
    fn test_snapshot_sensor_requires_url() {
        let mut config = create_test_config();
        config.sensor.kind = SensorKind::Snapshot;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(field)) if field == "sensor.url"
        ));
    }

    #[test]
    fn test_invalid_upload_url() {
        let mut config = create_test_config();
        config.upload.url = "ftp://collector/upload".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = create_test_config();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_min_frame_bytes(), 1000);
        assert_eq!(default_probe_window(), 100);
        assert_eq!(default_max_attempts(), 3);
        assert_eq!(default_field_name(), "file");
        assert_eq!(ScheduleConfig::default().cadence(), Duration::from_secs(60));
    }
}
