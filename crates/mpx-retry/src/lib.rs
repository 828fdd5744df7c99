// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry subsystem: targeted single-backend repair and full-record retry.
//!
//! Both modes share one in-flight set and go through the history store's
//! serialised results path, so concurrent retries for the same record can
//! never lose updates. A network precheck runs before any backend work;
//! there is no point burning a retry against a dead link.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod inflight;
mod precheck;

pub use backoff::{BASE_DELAY, MAX_DELAY, backoff_bounds, backoff_delay, base_backoff};
pub use inflight::{InflightGuard, InflightSet, RetryKey};
pub use precheck::NetworkPrecheck;

use mpx_backend::{CancelToken, UploadRequest};
use mpx_config::UserConfig;
use mpx_core::{BackendAttempt, BackendId, HistoryRecord};
use mpx_dispatch::{DispatchError, DispatchOutcome, DispatchRequest, Dispatcher};
use mpx_error::UploadError;
use mpx_history::{HistoryError, HistoryStore, RecordPatch};
use mpx_progress::ProgressSender;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Default full-retry ceiling per record.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors from the retry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// A backend- or network-level failure.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The history store failed.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The re-dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A conflicting retry is already running for this record.
    #[error("a retry is already in flight for record {record_id}")]
    InFlight {
        /// The contested record.
        record_id: String,
    },

    /// The record used up its full-retry budget.
    #[error("retry limit reached: {retry_count} of {max_retries} retries used")]
    Exhausted {
        /// Retries consumed so far.
        retry_count: u32,
        /// The ceiling.
        max_retries: u32,
    },

    /// The record never dispatched to that backend.
    #[error("record {record_id} has no attempt for backend {backend_id}")]
    UnknownAttempt {
        /// The record.
        record_id: String,
        /// The backend that was never attempted.
        backend_id: BackendId,
    },
}

/// Coordinates retries across the session.
pub struct RetryManager {
    dispatcher: Dispatcher,
    store: HistoryStore,
    precheck: NetworkPrecheck,
    inflight: InflightSet,
    counters: Mutex<HashMap<String, u32>>,
    max_retries: u32,
}

impl RetryManager {
    /// Build a manager over the dispatcher and store.
    pub fn new(dispatcher: Dispatcher, store: HistoryStore) -> Self {
        Self {
            dispatcher,
            store,
            precheck: NetworkPrecheck::new(),
            inflight: InflightSet::new(),
            counters: Mutex::new(HashMap::new()),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Replace the connectivity precheck.
    pub fn with_precheck(mut self, precheck: NetworkPrecheck) -> Self {
        self.precheck = precheck;
        self
    }

    /// Override the full-retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Full retries already consumed for a record.
    pub fn retry_count(&self, record_id: &str) -> u32 {
        self.counters
            .lock()
            .map(|c| c.get(record_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Whether any retry is currently running for a record.
    pub fn is_record_busy(&self, record_id: &str) -> bool {
        self.inflight.is_record_busy(record_id)
    }

    /// Re-run one failed backend and repair its entry in the record.
    ///
    /// The primary backend and generated link are left untouched: a
    /// targeted repair never re-elects.
    pub async fn retry_single(
        &self,
        record_id: &str,
        backend_id: BackendId,
        config: &UserConfig,
        progress: &ProgressSender,
        cancel: CancelToken,
    ) -> Result<HistoryRecord, RetryError> {
        self.precheck.check().await?;
        let _guard = self
            .inflight
            .try_acquire(RetryKey::Single(record_id.to_string(), backend_id))
            .ok_or_else(|| RetryError::InFlight {
                record_id: record_id.to_string(),
            })?;

        let record = self
            .store
            .get_by_id(record_id)?
            .ok_or_else(|| HistoryError::NotFound {
                id: record_id.to_string(),
            })?;
        if !record.results.iter().any(|a| a.backend_id == backend_id) {
            return Err(RetryError::UnknownAttempt {
                record_id: record_id.to_string(),
                backend_id,
            });
        }
        let file_path = source_file(&record).await?;

        let backend = self.dispatcher.registry().create(backend_id, config)?;
        let report = backend.validate();
        if !report.valid {
            return Err(UploadError::NoConfiguredBackend.into());
        }

        info!(record = record_id, backend = %backend_id, "single-backend retry starting");
        let sink = progress.sink(Uuid::new_v4(), backend_id);
        let outcome = backend
            .upload(UploadRequest::new(file_path, sink, cancel))
            .await;

        match outcome {
            Ok(result) => {
                let updated = self
                    .store
                    .patch_results(record_id, |results| {
                        for attempt in results.iter_mut() {
                            if attempt.backend_id == backend_id {
                                *attempt = BackendAttempt::success(result.clone());
                            }
                        }
                    })
                    .await?;
                Ok(updated)
            }
            Err(err) => {
                warn!(record = record_id, backend = %backend_id, %err, "single-backend retry failed");
                let message = err.to_string();
                self.store
                    .patch_results(record_id, |results| {
                        for attempt in results.iter_mut() {
                            if attempt.backend_id == backend_id && !attempt.is_success() {
                                attempt.error = Some(message.clone());
                            }
                        }
                    })
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Re-dispatch the whole record after an exponential-backoff delay.
    ///
    /// On success the record's `results` are replaced wholesale and the
    /// primary backend is re-elected from the new dispatch; `generated_link`
    /// is overwritten to the new primary's link, so callers that pinned the
    /// old link must re-read the record.
    pub async fn retry_all(
        &self,
        record_id: &str,
        config: &UserConfig,
        progress: &ProgressSender,
        cancel: CancelToken,
    ) -> Result<(HistoryRecord, DispatchOutcome), RetryError> {
        self.precheck.check().await?;
        let _guard = self
            .inflight
            .try_acquire(RetryKey::Full(record_id.to_string()))
            .ok_or_else(|| RetryError::InFlight {
                record_id: record_id.to_string(),
            })?;

        let retry_count = self.retry_count(record_id);
        if retry_count >= self.max_retries {
            return Err(RetryError::Exhausted {
                retry_count,
                max_retries: self.max_retries,
            });
        }

        let record = self
            .store
            .get_by_id(record_id)?
            .ok_or_else(|| HistoryError::NotFound {
                id: record_id.to_string(),
            })?;
        let file_path = source_file(&record).await?;

        let delay = backoff_delay(retry_count);
        info!(record = record_id, retry_count, ?delay, "full retry sleeping");
        tokio::time::sleep(delay).await;

        let outcome = self
            .dispatcher
            .dispatch(DispatchRequest {
                file_path: file_path.into(),
                enabled_backends: config.enabled_backends.clone(),
                config: config.clone(),
                progress: progress.clone(),
                cancel,
            })
            .await;

        // The attempt is consumed whether or not it worked.
        self.bump_counter(record_id);

        let outcome = outcome?;
        self.store
            .update(
                record_id,
                RecordPatch {
                    results: Some(outcome.attempts.clone()),
                    primary_backend: Some(outcome.primary_backend),
                    generated_link: Some(outcome.primary_url.clone()),
                    ..RecordPatch::default()
                },
            )
            .await?;
        let updated = self
            .store
            .get_by_id(record_id)?
            .ok_or_else(|| HistoryError::NotFound {
                id: record_id.to_string(),
            })?;
        Ok((updated, outcome))
    }

    fn bump_counter(&self, record_id: &str) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(record_id.to_string()).or_insert(0) += 1;
        }
    }
}

/// A retry needs the original file. A record without a path, or whose file
/// is gone from disk, can never be repaired by retrying — refuse up front
/// with the non-recoverable kind.
async fn source_file(record: &HistoryRecord) -> Result<String, UploadError> {
    let Some(path) = record.file_path.clone() else {
        return Err(UploadError::file_system(
            "stat",
            record.local_file_name.clone(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "source path unknown"),
        ));
    };
    tokio::fs::metadata(&path)
        .await
        .map_err(|e| UploadError::file_system("stat", path.clone(), e))?;
    Ok(path)
}

#[cfg(test)]
mod tests;
