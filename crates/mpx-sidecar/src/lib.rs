// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client for the credential-fetcher sidecar.
//!
//! Backends that reject headless HTTP clients get their tokens and cookies
//! from an out-of-process helper that drives a real browser. The process
//! boundary is intentional: the engine never embeds a browser. The contract
//! is one process invocation per request — arguments on argv, exactly one
//! JSON object on stdout, exit code 0 on success.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod cookie;
mod process;

pub use cache::TokenCache;
pub use cookie::{COOKIE_RULES, CookieRule, cookie_rule, cookie_satisfies, watch_cookies};
pub use process::{FetcherClient, SIDECAR_TIMEOUT};

use mpx_core::BackendId;
use mpx_error::{TimeoutStage, UploadError};
use serde::{Deserialize, Serialize};

/// Result of the browser probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserInfo {
    /// Whether a controllable browser was found.
    pub installed: bool,
    /// Path of the binary, when found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Human-readable browser name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A short-lived upload token captured by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// The captured token.
    pub token: String,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_ms: i64,
}

/// A cookie string captured by the login webview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieGrant {
    /// Full cookie string for the backend's domain.
    pub cookie: String,
}

/// Envelope every sidecar command prints on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct SidecarResponse<T> {
    /// Whether the command succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Errors from sidecar invocation.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    /// The fetcher binary could not be spawned.
    #[error("failed to spawn fetcher: {0}")]
    Spawn(#[source] std::io::Error),

    /// The invocation exceeded its budget and was killed.
    #[error("fetcher timed out")]
    Timeout,

    /// Stdout did not carry a well-formed response object.
    #[error("fetcher protocol violation: {0}")]
    Protocol(String),

    /// The fetcher reported a failure.
    #[error("fetcher failed: {0}")]
    Failed(String),

    /// The process exited non-zero without a parseable error.
    #[error("fetcher exited with {code:?}")]
    Exited {
        /// Process exit code, when the OS reported one.
        code: Option<i32>,
    },
}

impl SidecarError {
    /// Map into the engine taxonomy, attributing backend-specific failures.
    pub fn into_upload_error(self, backend_id: BackendId) -> UploadError {
        match self {
            Self::Timeout => UploadError::Timeout {
                stage: TimeoutStage::Sidecar,
            },
            Self::Failed(msg) if msg.contains("expired") => {
                UploadError::CredentialExpired { backend_id }
            }
            other => UploadError::protocol(backend_id, other.to_string()),
        }
    }
}
