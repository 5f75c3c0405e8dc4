//! Camlink Receiver Service
//!
//! HTTP endpoint accepting multipart image uploads from camlink camera nodes
//! and writing them to a filesystem directory or an S3-compatible bucket.
//!
//! ## Features
//!
//! - **Allow-listed uploads**: only image extensions are accepted; JPEG
//!   payloads are checked for a valid start marker
//! - **Generated names**: `<YYYYMMDD_HHMMSS>_<basename><ext>`, content type
//!   derived from the extension rather than the client's header
//! - **Pluggable write targets**: exclusive-create files on disk, or S3 with
//!   multipart uploads and optional public-read access
//!
//! ## Architecture
//!
//! ```text
//!  POST /upload            ┌──────────────┐
//! ────────────────────────▶│ Upload API   │
//!  multipart/form-data     └──────────────┘
//!                                 │ filename + payload checks
//!                                 ▼
//!                          ┌──────────────┐
//!                          │ Naming       │
//!                          └──────────────┘
//!                                 │
//!                   ┌─────────────┴─────────────┐
//!                   ▼                           ▼
//!            ┌──────────────┐           ┌──────────────┐
//!            │ Filesystem   │           │ S3 Store     │
//!            │ Store        │           │              │
//!            └──────────────┘           └──────────────┘
//! ```

pub mod config;
pub mod naming;
pub mod s3_store;
pub mod store;
pub mod upload_api;
pub mod validation;

pub use config::Config;
pub use naming::{ImageExtension, UploadName};
pub use s3_store::S3Store;
pub use store::{ArtifactStore, FilesystemStore, StoreError, StoredArtifact};
pub use upload_api::{create_router, start_api_server, AppState, UploadResponse};
pub use validation::UploadRejection;
