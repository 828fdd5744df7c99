// SPDX-License-Identifier: MIT OR Apache-2.0
//! The backend plugin contract.
//!
//! Every remote image host implements [`Backend`]: pure config validation,
//! a cheap connectivity probe, a streaming upload that reports progress
//! through the dispatch channel, and pure URL synthesis. Instances are
//! created per upload from a [`BackendRegistry`] and discarded afterwards;
//! the only state they hold is the config snapshot they closed over.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod http;
mod registry;

pub use cancel::CancelToken;
pub use http::{shared_client, map_reqwest_err, status_error};
pub use registry::{BackendConstructor, BackendRegistry};

use async_trait::async_trait;
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use mpx_progress::ProgressSink;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Budget for [`Backend::test_connection`].
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of pure config validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Whether the config is usable.
    pub valid: bool,
    /// Human-readable problems when it is not.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// A passing report.
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// A failing report with the given problems.
    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    /// A failing report with a single problem.
    pub fn fail_one(error: impl Into<String>) -> Self {
        Self::fail(vec![error.into()])
    }
}

/// Result of a connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Round-trip latency of the probe request.
    pub latency_ms: u64,
}

/// Everything a backend needs for one upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Local file to upload.
    pub file_path: PathBuf,
    /// File name to present to the backend.
    pub file_name: String,
    /// Progress sink tagged with this invocation's upload id.
    pub sink: ProgressSink,
    /// Cooperative cancellation handle.
    pub cancel: CancelToken,
}

impl UploadRequest {
    /// Build a request for `file_path`, deriving the presented file name.
    pub fn new(file_path: impl Into<PathBuf>, sink: ProgressSink, cancel: CancelToken) -> Self {
        let file_path = file_path.into();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".into());
        Self {
            file_path,
            file_name,
            sink,
            cancel,
        }
    }

    /// MIME type guessed from the file extension.
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.file_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    /// Read the whole file, mapping failures into the taxonomy.
    pub async fn read_file(&self) -> Result<Vec<u8>, UploadError> {
        read_file_bytes(&self.file_path).await
    }
}

/// Read a local file into memory with taxonomy-mapped errors.
pub async fn read_file_bytes(path: &Path) -> Result<Vec<u8>, UploadError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| UploadError::file_system("read", path, e))
}

/// One remote image-hosting target.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// The backend's id.
    fn id(&self) -> BackendId;

    /// Pure validation of the config snapshot this instance closed over.
    ///
    /// No I/O: this runs for every enabled backend on every dispatch.
    fn validate(&self) -> ValidationReport;

    /// A cheap round-trip to confirm credentials and reachability.
    ///
    /// Implementations must resolve within [`PROBE_TIMEOUT`].
    async fn test_connection(&self) -> Result<Probe, UploadError>;

    /// Stream the file to the backend, emitting progress through the
    /// request's sink: once at open, at least every 256 KiB or 10 %, and
    /// exactly once at 100 % on success.
    async fn upload(&self, req: UploadRequest) -> Result<UploadResult, UploadError>;

    /// Assemble the user-visible URL for a result. Pure.
    fn public_url(&self, result: &UploadResult) -> String;
}
