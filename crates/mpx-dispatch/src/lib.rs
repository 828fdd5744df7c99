// SPDX-License-Identifier: MIT OR Apache-2.0
//! The dispatcher: one file in, up to three backend uploads out.
//!
//! Backends run in parallel with all-settled semantics — a failure never
//! cancels its siblings, and neither does the first success. The primary
//! backend is elected deterministically from the *input* order, regardless
//! of completion order.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod job;
mod registry;

pub use job::run_upload_job;
pub use registry::standard_registry;

use mpx_backend::{BackendRegistry, CancelToken, UploadRequest};
use mpx_config::UserConfig;
use mpx_core::{BackendAttempt, BackendId, UploadResult};
use mpx_error::UploadError;
use mpx_progress::ProgressSender;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// Hard cap on concurrent backends per file.
///
/// This mirrors the rate limits of the public hosts and is deliberately not
/// a tunable.
pub const MAX_CONCURRENT_BACKENDS: usize = 3;

/// Everything one dispatch needs.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Local file to upload.
    pub file_path: PathBuf,
    /// Backends to dispatch to, in priority order.
    pub enabled_backends: Vec<BackendId>,
    /// Config snapshot the backend instances close over.
    pub config: UserConfig,
    /// Progress channel for this dispatch.
    pub progress: ProgressSender,
    /// Cancellation handle; cancelling aborts every in-flight backend.
    pub cancel: CancelToken,
}

/// What a finished dispatch produced.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// The first backend in input order that succeeded.
    pub primary_backend: BackendId,
    /// The primary result after link formatting.
    pub primary_url: String,
    /// The primary attempt's raw result.
    pub primary_result: UploadResult,
    /// One attempt per dispatched backend, in dispatch order.
    pub attempts: Vec<BackendAttempt>,
    /// Backends that were actually dispatched (validated, capped).
    pub dispatched: Vec<BackendId>,
    /// `upload_id` per dispatched backend, for the session's reverse map.
    pub upload_ids: HashMap<BackendId, Uuid>,
    /// At least one success and at least one failure.
    pub is_partial_success: bool,
    /// Backends whose failure was an expired credential.
    pub credential_expired: Vec<BackendId>,
}

/// Dispatch-level failure.
#[derive(Debug)]
pub enum DispatchError {
    /// Nothing was attempted.
    Fatal(UploadError),

    /// Every dispatched backend failed.
    AllFailed {
        /// Per-backend failure lines, in dispatch order.
        failures: Vec<(BackendId, String)>,
        /// Backends that failed on an expired credential.
        credential_expired: Vec<BackendId>,
    },

    /// The finished record could not be persisted.
    Persist(mpx_history::HistoryError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal(e) => write!(f, "{e}"),
            Self::AllFailed { failures, .. } => {
                writeln!(f, "all backends failed:")?;
                for (backend, line) in failures {
                    writeln!(f, "  {backend}: {line}")?;
                }
                Ok(())
            }
            Self::Persist(e) => write!(f, "failed to persist history record: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fatal(e) => Some(e),
            Self::AllFailed { .. } => None,
            Self::Persist(e) => Some(e),
        }
    }
}

impl From<UploadError> for DispatchError {
    fn from(e: UploadError) -> Self {
        Self::Fatal(e)
    }
}

impl From<mpx_history::HistoryError> for DispatchError {
    fn from(e: mpx_history::HistoryError) -> Self {
        Self::Persist(e)
    }
}

/// The dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
}

impl Dispatcher {
    /// Build around an explicit registry.
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher draws from.
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Run one dispatch to completion.
    ///
    /// # Errors
    ///
    /// - [`UploadError::NoEnabledBackend`] for an empty backend list;
    /// - [`UploadError::NoConfiguredBackend`] when validation drops them all;
    /// - [`UploadError::Cancelled`] when the caller cancelled — the caller
    ///   must not write a history record in that case;
    /// - [`DispatchError::AllFailed`] when every backend failed.
    pub async fn dispatch(&self, req: DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        if req.enabled_backends.is_empty() {
            return Err(UploadError::NoEnabledBackend.into());
        }

        // Filter: instantiate and validate; invalid configs are dropped
        // here, not reported as failed attempts.
        let mut candidates = Vec::new();
        for &id in &req.enabled_backends {
            let backend = match self.registry.create(id, &req.config) {
                Ok(b) => b,
                Err(e) => {
                    warn!(backend = %id, %e, "backend not constructible, skipping");
                    continue;
                }
            };
            let report = backend.validate();
            if report.valid {
                candidates.push((id, backend));
            } else {
                warn!(backend = %id, errors = ?report.errors, "backend config invalid, skipping");
            }
        }
        if candidates.is_empty() {
            return Err(UploadError::NoConfiguredBackend.into());
        }

        // Bound: hard cap, ordering preserved.
        if candidates.len() > MAX_CONCURRENT_BACKENDS {
            let trimmed: Vec<BackendId> = candidates[MAX_CONCURRENT_BACKENDS..]
                .iter()
                .map(|(id, _)| *id)
                .collect();
            warn!(?trimmed, cap = MAX_CONCURRENT_BACKENDS, "trimming dispatch set");
            candidates.truncate(MAX_CONCURRENT_BACKENDS);
        }
        let dispatched: Vec<BackendId> = candidates.iter().map(|(id, _)| *id).collect();

        // Fan out.
        let mut upload_ids = HashMap::new();
        let mut set = JoinSet::new();
        for (slot, (id, backend)) in candidates.into_iter().enumerate() {
            let upload_id = Uuid::new_v4();
            upload_ids.insert(id, upload_id);
            let sink = req.progress.sink(upload_id, id);
            let upload_req = UploadRequest::new(req.file_path.clone(), sink, req.cancel.clone());
            set.spawn(async move {
                debug!(backend = %id, %upload_id, "backend upload starting");
                let outcome = backend.upload(upload_req).await;
                (slot, id, outcome)
            });
        }

        // Aggregate: all-settled, no sibling cancellation.
        let mut slots: Vec<Option<BackendAttempt>> = vec![None; dispatched.len()];
        let mut credential_expired: Vec<BackendId> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, id, Ok(result))) => {
                    slots[slot] = Some(BackendAttempt::success(result));
                    debug!(backend = %id, "backend upload succeeded");
                }
                Ok((slot, id, Err(err))) => {
                    debug!(backend = %id, %err, "backend upload failed");
                    if matches!(err, UploadError::CredentialExpired { .. }) {
                        credential_expired.push(id);
                    }
                    slots[slot] = Some(attempt_from_error(id, &err));
                }
                Err(join_err) => {
                    // A panicked backend task settles as a failure rather
                    // than poisoning the dispatch.
                    warn!(%join_err, "backend task panicked");
                }
            }
        }
        credential_expired.sort_by_key(|id| dispatched.iter().position(|d| d == id));

        if req.cancel.is_cancelled() {
            return Err(UploadError::Cancelled.into());
        }

        let attempts: Vec<BackendAttempt> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| BackendAttempt::failed(dispatched[i], "backend task panicked"))
            })
            .collect();

        // Elect primary: first success in input order.
        let primary = attempts.iter().find(|a| a.is_success());
        let Some(primary_attempt) = primary else {
            let failures = attempts
                .iter()
                .map(|a| {
                    (
                        a.backend_id,
                        a.error.clone().unwrap_or_else(|| "unknown error".into()),
                    )
                })
                .collect();
            return Err(DispatchError::AllFailed {
                failures,
                credential_expired,
            });
        };
        let primary_result = primary_attempt
            .result
            .clone()
            .unwrap_or_else(|| unreachable_result(primary_attempt.backend_id));

        let primary_url = mpx_link::render_link(&primary_result, &req.config);
        let any_failed = attempts.iter().any(|a| !a.is_success());

        Ok(DispatchOutcome {
            primary_backend: primary_attempt.backend_id,
            primary_url,
            primary_result,
            attempts,
            dispatched,
            upload_ids,
            is_partial_success: any_failed,
            credential_expired,
        })
    }
}

fn attempt_from_error(id: BackendId, err: &UploadError) -> BackendAttempt {
    BackendAttempt::failed(id, err.to_string())
}

// A success attempt always carries its result; this placates the type
// system without panicking in release builds.
fn unreachable_result(id: BackendId) -> UploadResult {
    UploadResult {
        backend_id: id,
        file_key: String::new(),
        url: String::new(),
        size_bytes: 0,
        width: None,
        height: None,
        metadata: Default::default(),
    }
}
