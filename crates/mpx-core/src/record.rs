// SPDX-License-Identifier: MIT OR Apache-2.0
//! Upload results, per-backend attempts, and the durable history record.

use crate::{BackendId, ImageMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Successful upload of one file to one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Backend that accepted the file.
    pub backend_id: BackendId,
    /// Backend-native identifier (S3 key, weibo pid, GitHub path, …).
    pub file_key: String,
    /// Directly fetchable URL for the uploaded image.
    pub url: String,
    /// Size of the uploaded file in bytes.
    pub size_bytes: u64,
    /// Pixel width, when the backend or the local probe reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height, when the backend or the local probe reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Backend-specific extras preserved verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Terminal state of one backend attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// The backend accepted the file.
    Success,
    /// The backend rejected the file or the transfer failed.
    Failed,
}

/// One backend's outcome within a dispatch.
///
/// Exactly one of `result` / `error` is populated, matching `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendAttempt {
    /// Backend this attempt ran against.
    pub backend_id: BackendId,
    /// Terminal status.
    pub status: AttemptStatus,
    /// Present when `status` is [`AttemptStatus::Success`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<UploadResult>,
    /// Present when `status` is [`AttemptStatus::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendAttempt {
    /// Build a success attempt from an upload result.
    pub fn success(result: UploadResult) -> Self {
        Self {
            backend_id: result.backend_id,
            status: AttemptStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failed attempt carrying the error message.
    pub fn failed(backend_id: BackendId, error: impl Into<String>) -> Self {
        Self {
            backend_id,
            status: AttemptStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    /// `true` when the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

/// Violations of the history-record invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// `primary_backend` has no successful attempt in `results`.
    #[error("primary backend {0} is not among the successful attempts")]
    PrimaryNotSuccessful(BackendId),
    /// The same backend appears more than once in `results`.
    #[error("duplicate attempt for backend {0}")]
    DuplicateAttempt(BackendId),
    /// `results` is empty.
    #[error("record has no attempts")]
    NoAttempts,
}

/// One durable row per uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Opaque record id.
    pub id: String,
    /// Upload wall-clock time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// File name as it was on the local disk.
    pub local_file_name: String,
    /// Absolute path of the source file, when still known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// The elected primary backend; its URL is canonical for this record.
    pub primary_backend: BackendId,
    /// One attempt per dispatched backend.
    pub results: Vec<BackendAttempt>,
    /// The link-format layer's rendering of the primary attempt.
    pub generated_link: String,
    /// Local image metadata probed at upload time.
    #[serde(default)]
    pub image_meta: ImageMeta,
    /// Opaque per-backend validity data written by the link checker.
    ///
    /// The engine stores and returns this verbatim; it never produces or
    /// interprets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_check_status: Option<serde_json::Value>,
}

impl HistoryRecord {
    /// Check the record invariants: the primary backend must be a successful
    /// attempt, and each backend appears at most once.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.results.is_empty() {
            return Err(RecordError::NoAttempts);
        }
        let mut seen = std::collections::HashSet::new();
        for attempt in &self.results {
            if !seen.insert(attempt.backend_id) {
                return Err(RecordError::DuplicateAttempt(attempt.backend_id));
            }
        }
        let primary_ok = self
            .results
            .iter()
            .any(|a| a.backend_id == self.primary_backend && a.is_success());
        if !primary_ok {
            return Err(RecordError::PrimaryNotSuccessful(self.primary_backend));
        }
        Ok(())
    }

    /// The successful attempt elected as primary, if the record is well formed.
    pub fn primary_attempt(&self) -> Option<&BackendAttempt> {
        self.results
            .iter()
            .find(|a| a.backend_id == self.primary_backend && a.is_success())
    }

    /// Backends whose attempt failed, in record order.
    pub fn failed_backends(&self) -> Vec<BackendId> {
        self.results
            .iter()
            .filter(|a| !a.is_success())
            .map(|a| a.backend_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_for(id: BackendId) -> UploadResult {
        UploadResult {
            backend_id: id,
            file_key: format!("{id}/key.png"),
            url: format!("https://{id}.example/key.png"),
            size_bytes: 1024,
            width: Some(64),
            height: Some(64),
            metadata: BTreeMap::new(),
        }
    }

    fn record_with(primary: BackendId, results: Vec<BackendAttempt>) -> HistoryRecord {
        HistoryRecord {
            id: "rec-1".into(),
            timestamp_ms: 1_700_000_000_000,
            local_file_name: "cat.png".into(),
            file_path: Some("/tmp/cat.png".into()),
            primary_backend: primary,
            results,
            generated_link: "https://r2.example/key.png".into(),
            image_meta: ImageMeta::default(),
            link_check_status: None,
        }
    }

    #[test]
    fn valid_record_passes() {
        let rec = record_with(
            BackendId::R2,
            vec![
                BackendAttempt::success(result_for(BackendId::R2)),
                BackendAttempt::failed(BackendId::Weibo, "cookie expired"),
            ],
        );
        rec.validate().unwrap();
        assert_eq!(rec.primary_attempt().unwrap().backend_id, BackendId::R2);
        assert_eq!(rec.failed_backends(), vec![BackendId::Weibo]);
    }

    #[test]
    fn primary_must_be_a_success() {
        let rec = record_with(
            BackendId::Weibo,
            vec![
                BackendAttempt::success(result_for(BackendId::R2)),
                BackendAttempt::failed(BackendId::Weibo, "cookie expired"),
            ],
        );
        assert_eq!(
            rec.validate().unwrap_err(),
            RecordError::PrimaryNotSuccessful(BackendId::Weibo)
        );
    }

    #[test]
    fn duplicate_backend_is_rejected() {
        let rec = record_with(
            BackendId::R2,
            vec![
                BackendAttempt::success(result_for(BackendId::R2)),
                BackendAttempt::failed(BackendId::R2, "second attempt"),
            ],
        );
        assert_eq!(
            rec.validate().unwrap_err(),
            RecordError::DuplicateAttempt(BackendId::R2)
        );
    }

    #[test]
    fn empty_results_are_rejected() {
        let rec = record_with(BackendId::R2, vec![]);
        assert_eq!(rec.validate().unwrap_err(), RecordError::NoAttempts);
    }

    #[test]
    fn attempt_serde_omits_absent_halves() {
        let ok = BackendAttempt::success(result_for(BackendId::R2));
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());

        let failed = BackendAttempt::failed(BackendId::Weibo, "boom");
        let json = serde_json::to_value(&failed).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn record_serde_roundtrip() {
        let rec = record_with(
            BackendId::R2,
            vec![BackendAttempt::success(result_for(BackendId::R2))],
        );
        let json = serde_json::to_string(&rec).unwrap();
        let back: HistoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
