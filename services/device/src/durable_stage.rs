//! Local durable copies of validated frames.
//!
//! The medium (typically an SD card) may disappear at any time, so its
//! presence is re-checked before every write. Any failure folds into
//! `Unavailable` and the caller uploads from memory instead.

use crate::config::StorageConfig;
use crate::frame::ValidatedFrame;
use async_trait::async_trait;
use bytes::Bytes;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Stable reference to a frame's on-medium copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableHandle {
    pub path: PathBuf,
    pub size: u64,
}

impl DurableHandle {
    /// Read the copy back, checking it still has the recorded size.
    pub async fn read(&self) -> std::io::Result<Bytes> {
        let data = tokio::fs::read(&self.path).await?;
        if data.len() as u64 != self.size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "{} holds {} bytes, expected {}",
                    self.path.display(),
                    data.len(),
                    self.size
                ),
            ));
        }
        Ok(Bytes::from(data))
    }
}

/// Why a frame could not be persisted.
#[derive(Debug, Error)]
pub enum Unavailable {
    #[error("Storage medium not present at {0}")]
    MediumMissing(PathBuf),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Short write to {path}: {written} of {expected} bytes")]
    ShortWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persists validated frames.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn persist(&self, frame: &ValidatedFrame) -> Result<DurableHandle, Unavailable>;
}

/// Writes frames under `<mount_root>/<images_dir>`.
pub struct LocalDurableStage {
    mount_root: PathBuf,
    images_dir: PathBuf,
    require_mount_point: bool,
    counter: AtomicU64,
    epoch: Instant,
}

impl LocalDurableStage {
    pub fn new(config: &StorageConfig) -> Self {
        let mount_root = PathBuf::from(&config.mount_root);
        let images_dir = mount_root.join(&config.images_dir);
        Self {
            mount_root,
            images_dir,
            require_mount_point: config.require_mount_point,
            counter: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Directory frames are written to.
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    async fn check_medium(&self) -> Result<(), Unavailable> {
        let present = match tokio::fs::metadata(&self.mount_root).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        };
        if !present {
            return Err(Unavailable::MediumMissing(self.mount_root.clone()));
        }

        if self.require_mount_point && !is_mount_point(&self.mount_root) {
            return Err(Unavailable::MediumMissing(self.mount_root.clone()));
        }

        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|source| Unavailable::Open {
                path: self.images_dir.clone(),
                source,
            })
    }

    /// Counter plus uptime tick; never reused within a process.
    fn next_path(&self, extension: &str) -> PathBuf {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let tick = self.epoch.elapsed().as_micros();
        self.images_dir
            .join(format!("img_{:06}_{}.{}", counter, tick, extension))
    }
}

#[async_trait]
impl DurableStore for LocalDurableStage {
    #[instrument(skip(self, frame), fields(bytes = frame.len()))]
    async fn persist(&self, frame: &ValidatedFrame) -> Result<DurableHandle, Unavailable> {
        self.check_medium().await?;

        let path = self.next_path(frame.format().extension());
        let data = frame.bytes();

        let write_path = path.clone();
        let written = tokio::task::spawn_blocking(move || write_once(&write_path, &data))
            .await
            .map_err(|e| Unavailable::Write {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })??;

        debug!(path = %path.display(), bytes = written, "Frame persisted");

        Ok(DurableHandle {
            path,
            size: written as u64,
        })
    }
}

/// One write call on a freshly created file; a short write removes the file.
fn write_once(path: &Path, data: &[u8]) -> Result<usize, Unavailable> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| Unavailable::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let result = file
        .write(data)
        .and_then(|written| file.sync_all().map(|()| written));

    match result {
        Ok(written) if written == data.len() => Ok(written),
        Ok(written) => {
            discard_partial(path);
            Err(Unavailable::ShortWrite {
                path: path.to_path_buf(),
                written,
                expected: data.len(),
            })
        }
        Err(source) => {
            discard_partial(path);
            Err(Unavailable::Write {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

fn discard_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove partial frame");
    }
}

#[cfg(unix)]
fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Some(parent) = path.parent() else {
        return true;
    };
    match (std::fs::metadata(path), std::fs::metadata(parent)) {
        (Ok(dir), Ok(parent)) => dir.dev() != parent.dev() || dir.ino() == parent.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameFormat};
    use crate::validator::FrameValidator;

    fn validated(len: usize) -> ValidatedFrame {
        let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8 | 0x01).collect();
        data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        let frame = Frame::new(data, 1600, 1200, FrameFormat::Jpeg);
        FrameValidator::default().validate(frame).unwrap()
    }

    fn stage_config(root: &Path) -> StorageConfig {
        StorageConfig {
            enabled: true,
            mount_root: root.display().to_string(),
            images_dir: "images".to_string(),
            require_mount_point: false,
        }
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let stage = LocalDurableStage::new(&stage_config(root.path()));
        let frame = validated(5000);

        let handle = stage.persist(&frame).await.unwrap();
        assert_eq!(handle.size, 5000);
        assert!(handle.path.starts_with(stage.images_dir()));
        assert_eq!(handle.path.extension().unwrap(), "jpg");

        let read_back = handle.read().await.unwrap();
        assert_eq!(&read_back[..], frame.data());
    }

    #[tokio::test]
    async fn test_names_are_never_reused() {
        let root = tempfile::tempdir().unwrap();
        let stage = LocalDurableStage::new(&stage_config(root.path()));
        let frame = validated(1200);

        let first = stage.persist(&frame).await.unwrap();
        let second = stage.persist(&frame).await.unwrap();
        assert_ne!(first.path, second.path);

        let name = first.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("img_000001_"));
    }

    #[tokio::test]
    async fn test_missing_medium_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("sdcard");
        let stage = LocalDurableStage::new(&stage_config(&missing));

        assert!(matches!(
            stage.persist(&validated(1500)).await,
            Err(Unavailable::MediumMissing(_))
        ));

        // medium inserted later is picked up without restart
        std::fs::create_dir(&missing).unwrap();
        assert!(stage.persist(&validated(1500)).await.is_ok());
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.jpg");
        std::fs::write(&path, b"original").unwrap();

        assert!(matches!(
            write_once(&path, b"replacement"),
            Err(Unavailable::Open { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_handle_read_detects_size_change() {
        let root = tempfile::tempdir().unwrap();
        let stage = LocalDurableStage::new(&stage_config(root.path()));
        let handle = stage.persist(&validated(2000)).await.unwrap();

        std::fs::write(&handle.path, b"truncated").unwrap();
        assert!(handle.read().await.is_err());
    }
}
