//! Frame sources.
//!
//! Register-level sensor setup happens outside this crate; the pipeline only
//! sees the `Sensor` capability.

use crate::config::{SensorConfig, SensorKind};
use crate::frame::{Frame, FrameFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while capturing a frame.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Sensor returned no frame: {0}")]
    NoFrame(String),

    #[error("Sensor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Snapshot endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Sensor initialization failed: {0}")]
    Init(String),
}

/// Anything that can produce a frame on request.
#[async_trait]
pub trait Sensor: Send {
    /// Capture one frame.
    async fn capture(&mut self) -> Result<Frame, CaptureError>;

    /// Settling time after initialization before frames are trustworthy.
    fn warm_up(&self) -> Duration {
        Duration::ZERO
    }
}

/// Replays the image files of a directory in name order, wrapping around.
pub struct DirectorySensor {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    sequence: u64,
    format: FrameFormat,
    width: u32,
    height: u32,
    warm_up: Duration,
}

impl DirectorySensor {
    /// Scan `dir` for frames.
    pub fn open(dir: impl AsRef<Path>, config: &SensorConfig) -> Result<Self, CaptureError> {
        let dir = dir.as_ref().to_path_buf();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        info!(dir = %dir.display(), frames = files.len(), "Directory sensor initialized");

        Ok(Self {
            dir,
            files,
            next: 0,
            sequence: 0,
            format: config.format,
            width: config.width,
            height: config.height,
            warm_up: config.warm_up(),
        })
    }
}

#[async_trait]
impl Sensor for DirectorySensor {
    async fn capture(&mut self) -> Result<Frame, CaptureError> {
        if self.files.is_empty() {
            return Err(CaptureError::NoFrame(format!(
                "no frames in {}",
                self.dir.display()
            )));
        }

        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();

        let data = tokio::fs::read(path).await?;
        self.sequence += 1;

        debug!(path = %path.display(), bytes = data.len(), "Frame read from directory");

        Ok(Frame::new(data, self.width, self.height, self.format).with_sequence(self.sequence))
    }

    fn warm_up(&self) -> Duration {
        self.warm_up
    }
}

/// Fetches a still image from a camera's snapshot endpoint.
pub struct SnapshotSensor {
    client: reqwest::Client,
    url: String,
    sequence: u64,
    format: FrameFormat,
    width: u32,
    height: u32,
    warm_up: Duration,
}

impl SnapshotSensor {
    pub fn new(url: impl Into<String>, config: &SensorConfig) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .timeout(config.snapshot_timeout())
            .build()
            .map_err(|e| CaptureError::Init(e.to_string()))?;

        let url = url.into();
        info!(url = %url, "Snapshot sensor initialized");

        Ok(Self {
            client,
            url,
            sequence: 0,
            format: config.format,
            width: config.width,
            height: config.height,
            warm_up: config.warm_up(),
        })
    }
}

#[async_trait]
impl Sensor for SnapshotSensor {
    async fn capture(&mut self) -> Result<Frame, CaptureError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::Status(status.as_u16()));
        }

        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(CaptureError::NoFrame("empty snapshot body".to_string()));
        }
        self.sequence += 1;

        Ok(Frame::new(data, self.width, self.height, self.format).with_sequence(self.sequence))
    }

    fn warm_up(&self) -> Duration {
        self.warm_up
    }
}

/// Build the sensor selected by configuration.
pub fn build_sensor(config: &SensorConfig) -> Result<Box<dyn Sensor>, CaptureError> {
    match config.kind {
        SensorKind::Directory => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| CaptureError::Init("sensor.path is not set".to_string()))?;
            Ok(Box::new(DirectorySensor::open(path, config)?))
        }
        SensorKind::Snapshot => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| CaptureError::Init("sensor.url is not set".to_string()))?;
            Ok(Box::new(SnapshotSensor::new(url, config)?))
        }
    }
}
