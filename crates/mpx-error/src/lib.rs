// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the mirrorpix upload engine.
//!
//! Every failure that crosses a crate boundary is an [`UploadError`]. Each
//! variant maps to a stable `SCREAMING_SNAKE_CASE` code, a broad
//! [`ErrorCategory`], and a recoverability verdict that the retry subsystem
//! consults before spending network time.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use mpx_core::BackendId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Categories and stages
// ---------------------------------------------------------------------------

/// Broad family an [`UploadError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No usable backend was selected or configured.
    Selection,
    /// Credentials rejected, expired, or missing.
    Credential,
    /// The network itself is the problem.
    Network,
    /// The backend answered, but not usefully.
    Backend,
    /// Local filesystem trouble.
    FileSystem,
    /// The caller asked us to stop.
    Cancelled,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Selection => "selection",
            Self::Credential => "credential",
            Self::Network => "network",
            Self::Backend => "backend",
            Self::FileSystem => "file_system",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Which timeout budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    /// TCP/TLS connect budget (10 s).
    Connect,
    /// Whole-request budget (60 s).
    Request,
    /// Credential sidecar budget (30 s).
    Sidecar,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Sidecar => "sidecar",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// UploadError
// ---------------------------------------------------------------------------

/// Every failure the upload engine can surface.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The user selected zero backends.
    #[error("no backend is enabled")]
    NoEnabledBackend,

    /// Every selected backend failed config validation.
    #[error("no enabled backend has a valid configuration")]
    NoConfiguredBackend,

    /// A backend id with no registered constructor was requested.
    #[error("backend {backend_id} is not registered")]
    UnknownBackend {
        /// The unregistered id.
        backend_id: BackendId,
    },

    /// The backend rejected a credential that is known to the user's store;
    /// fixable by re-login, not by retry.
    #[error("{backend_id}: session credential expired, re-login required")]
    CredentialExpired {
        /// Backend that rejected the credential.
        backend_id: BackendId,
    },

    /// Credentials are plain wrong (distinct from expired).
    #[error("{backend_id}: authentication failed")]
    AuthFailure {
        /// Backend that rejected the credentials.
        backend_id: BackendId,
    },

    /// The connectivity precheck failed; nothing was attempted.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// A timeout budget was exhausted.
    #[error("timed out during {stage}")]
    Timeout {
        /// Which budget ran out.
        stage: TimeoutStage,
    },

    /// The backend returned an unparseable or error-coded response.
    #[error("{backend_id}: {message}")]
    BackendProtocol {
        /// Backend that misbehaved.
        backend_id: BackendId,
        /// Server-reported or parse-level detail.
        message: String,
    },

    /// The backend throttled us.
    #[error("{backend_id}: rate limited")]
    RateLimited {
        /// Backend that throttled.
        backend_id: BackendId,
        /// Server-suggested wait, if it sent one.
        retry_after_ms: Option<u64>,
    },

    /// A local file operation failed.
    #[error("{op} {path:?}: {source}")]
    FileSystem {
        /// Operation that failed (`open`, `read`, `stat`, …).
        op: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The dispatch or upload was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// Last-resort wrapping for errors with no better home.
    #[error("{message}")]
    Unknown {
        /// Human-readable description.
        message: String,
    },
}

impl UploadError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoEnabledBackend => "NO_ENABLED_BACKEND",
            Self::NoConfiguredBackend => "NO_CONFIGURED_BACKEND",
            Self::UnknownBackend { .. } => "UNKNOWN_BACKEND",
            Self::CredentialExpired { .. } => "CREDENTIAL_EXPIRED",
            Self::AuthFailure { .. } => "AUTH_FAILURE",
            Self::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::BackendProtocol { .. } => "BACKEND_PROTOCOL",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::FileSystem { .. } => "FILE_SYSTEM",
            Self::Cancelled => "CANCELLED",
            Self::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Broad category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoEnabledBackend | Self::NoConfiguredBackend | Self::UnknownBackend { .. } => {
                ErrorCategory::Selection
            }
            Self::CredentialExpired { .. } | Self::AuthFailure { .. } => ErrorCategory::Credential,
            Self::NetworkUnavailable | Self::Timeout { .. } => ErrorCategory::Network,
            Self::BackendProtocol { .. } | Self::RateLimited { .. } => ErrorCategory::Backend,
            Self::FileSystem { .. } => ErrorCategory::FileSystem,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Unknown { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether a retry could plausibly change the outcome.
    ///
    /// Expired or wrong credentials need re-login; a missing source file
    /// needs the user; everything else may be transient.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::CredentialExpired { .. } | Self::AuthFailure { .. } => false,
            Self::UnknownBackend { .. } => false,
            Self::FileSystem { source, .. } => source.kind() != std::io::ErrorKind::NotFound,
            Self::Cancelled => false,
            _ => true,
        }
    }

    /// The backend whose credential expired, when that is what happened.
    pub fn expired_backend(&self) -> Option<BackendId> {
        match self {
            Self::CredentialExpired { backend_id } => Some(*backend_id),
            _ => None,
        }
    }

    /// The backend this error is attributed to, if any.
    pub fn backend_id(&self) -> Option<BackendId> {
        match self {
            Self::CredentialExpired { backend_id }
            | Self::AuthFailure { backend_id }
            | Self::UnknownBackend { backend_id }
            | Self::BackendProtocol { backend_id, .. }
            | Self::RateLimited { backend_id, .. } => Some(*backend_id),
            _ => None,
        }
    }

    /// Convenience constructor for filesystem failures.
    pub fn file_system(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            op,
            path: path.into(),
            source,
        }
    }

    /// Convenience constructor for protocol failures.
    pub fn protocol(backend_id: BackendId, message: impl Into<String>) -> Self {
        Self::BackendProtocol {
            backend_id,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serializable snapshot
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`UploadError`], for history rows and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadErrorDto {
    /// Stable code.
    pub code: String,
    /// Rendered message.
    pub message: String,
    /// Attributed backend, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<BackendId>,
}

impl From<&UploadError> for UploadErrorDto {
    fn from(err: &UploadError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            backend_id: err.backend_id(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
