// SPDX-License-Identifier: MIT OR Apache-2.0
//! Raw progress payloads carried on the per-dispatch channel.

use crate::BackendId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Byte-level progress of one backend upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes transferred so far.
    pub uploaded_bytes: u64,
    /// Total bytes to transfer.
    pub total_bytes: u64,
}

impl Progress {
    /// Percent complete, clamped to 0–100. A zero-byte total reports 100.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = self.uploaded_bytes.saturating_mul(100) / self.total_bytes;
        pct.min(100) as u8
    }

    /// `true` once every byte has been transferred.
    pub fn is_complete(&self) -> bool {
        self.uploaded_bytes >= self.total_bytes
    }
}

/// Coarse stage of a multi-step upload, for backends that report one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    /// Validating config and opening the file.
    Preparing,
    /// Bytes are moving.
    Transferring,
    /// Waiting for the backend to acknowledge.
    Finalizing,
}

/// One progress event, namespaced by the backend-upload invocation.
///
/// `upload_id` is unique per backend invocation, so two backends uploading
/// the same file never share a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Unique id of this backend-upload invocation.
    pub upload_id: Uuid,
    /// Backend the bytes are going to.
    pub backend_id: BackendId,
    /// Byte counts.
    pub progress: Progress,
    /// Optional stage annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<UploadStage>,
}
