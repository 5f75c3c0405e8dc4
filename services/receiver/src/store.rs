//! Write targets for accepted uploads.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Errors raised by a write target.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Artifact {0} already exists")]
    AlreadyExists(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(String),
}

/// Description of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Generated storage name
    pub name: String,
    /// Bytes written
    pub size: u64,
    pub content_type: String,
    /// Bucket, for object storage targets
    pub bucket: Option<String>,
}

/// Somewhere uploads can be written under a generated name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `data` under `name`.
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredArtifact, StoreError>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

/// Stores uploads as files in a directory.
///
/// Files are created exclusively; an existing file is never replaced.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Open (and create if needed) the target directory.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        info!(dir = %root.display(), "Filesystem store initialized");

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FilesystemStore {
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredArtifact, StoreError> {
        let path = self.root.join(name);

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = write_all_synced(&mut file, &data).await {
            drop(file);
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %remove, "Failed to remove partial upload");
            }
            return Err(e.into());
        }

        debug!(path = %path.display(), "Artifact written");

        Ok(StoredArtifact {
            name: name.to_string(),
            size: data.len() as u64,
            content_type: content_type.to_string(),
            bucket: None,
        })
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

async fn write_all_synced(file: &mut tokio::fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.sync_all().await
}
