// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared data model for the mirrorpix upload engine.
//!
//! Everything that crosses a crate boundary lives here: backend identifiers,
//! per-backend upload results and attempts, durable [`HistoryRecord`]s, the
//! in-memory session queue, and raw progress payloads.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod id;
mod imagemeta;
mod progress;
mod queue;
mod record;

pub use id::{BackendId, BackendPartition, UnknownBackendId};
pub use imagemeta::{ImageMeta, probe_image_metadata};
pub use progress::{Progress, ProgressUpdate, UploadStage};
pub use queue::{BackendSlot, OverallStatus, QueueItem, SessionQueue, SlotStatus};
pub use record::{BackendAttempt, AttemptStatus, HistoryRecord, RecordError, UploadResult};
