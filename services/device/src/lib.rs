//! Camlink Device Service
//!
//! Periodic capture and delivery pipeline for a networked camera node. On a
//! fixed cadence the device captures a frame, checks it for structural
//! integrity, optionally writes a durable local copy and uploads it once to a
//! collection endpoint as a multipart form.
//!
//! ## Features
//!
//! - **Bounded local retry**: capture and validation failures are retried with
//!   a configurable policy; network failures wait for the next cadence tick
//! - **Durable staging**: frames are written to removable media before upload,
//!   with a transparent in-memory fallback when the medium is missing
//! - **Explicit accounting**: attempt, success, failure and byte totals with
//!   derived rates reported on a diagnostics interval
//!
//! ## Architecture
//!
//! ```text
//!  cadence tick
//!       │
//!       ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Sensor       │──▶│ Frame        │──▶│ Durable      │
//! │ capture()    │   │ Validator    │   │ Stage        │
//! └──────────────┘   └──────────────┘   └──────────────┘
//!       ▲  retry            │ retry            │ handle or
//!       └───────────────────┘                  │ in-memory
//!                                              ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │ Accounting   │◀──│ Uploader     │──▶ POST /upload
//!                    └──────────────┘   └──────────────┘
//! ```

pub mod accounting;
pub mod config;
pub mod durable_stage;
pub mod frame;
pub mod link;
pub mod orchestrator;
pub mod retry;
pub mod sensor;
pub mod uploader;
pub mod validator;

pub use accounting::{Accounting, AccountingSnapshot, AttemptOutcome, DeliveryAttempt};
pub use config::DeviceConfig;
pub use durable_stage::{DurableHandle, DurableStore, LocalDurableStage, Unavailable};
pub use frame::{Frame, FrameFormat, ValidatedFrame};
pub use link::{build_link, LinkMonitor};
pub use orchestrator::{CycleReport, Orchestrator, PipelineState, Schedule};
pub use retry::RetryPolicy;
pub use sensor::{build_sensor, CaptureError, Sensor};
pub use uploader::{
    ReqwestTransport, Transport, UploadOutcome, UploadReceipt, UploadSource, Uploader,
    UploaderSettings,
};
pub use validator::{FrameValidator, InvalidFrame, Verdict};
