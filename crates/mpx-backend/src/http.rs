// SPDX-License-Identifier: MIT OR Apache-2.0
//! The process-wide HTTP client and response-to-taxonomy mapping.

use mpx_core::BackendId;
use mpx_error::{TimeoutStage, UploadError};
use std::sync::OnceLock;
use std::time::Duration;

/// Max idle connections kept per host.
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Idle connection lifetime.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Whole-request budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect budget.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The shared [`reqwest::Client`] every backend clones.
///
/// One pool for the whole process; per-backend clients would defeat the
/// connection reuse the rate-limited hosts depend on.
pub fn shared_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default()
    })
}

/// Map a transport-level [`reqwest::Error`] into the taxonomy.
pub fn map_reqwest_err(backend_id: BackendId, err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        let stage = if err.is_connect() {
            TimeoutStage::Connect
        } else {
            TimeoutStage::Request
        };
        return UploadError::Timeout { stage };
    }
    if err.is_connect() {
        return UploadError::NetworkUnavailable;
    }
    UploadError::protocol(backend_id, err.to_string())
}

/// Map a non-success HTTP status into the taxonomy.
///
/// `session_auth` says whether the backend authenticates with a session
/// credential (cookie or captured token): for those, 401/403 means the
/// session expired and a re-login fixes it; for key-based backends the same
/// statuses mean the keys are wrong.
pub fn status_error(
    backend_id: BackendId,
    status: reqwest::StatusCode,
    body_snippet: &str,
    session_auth: bool,
) -> UploadError {
    match status.as_u16() {
        401 | 403 => {
            if session_auth {
                UploadError::CredentialExpired { backend_id }
            } else {
                UploadError::AuthFailure { backend_id }
            }
        }
        429 => UploadError::RateLimited {
            backend_id,
            retry_after_ms: None,
        },
        _ => UploadError::protocol(
            backend_id,
            format!("HTTP {status}: {}", truncate(body_snippet, 200)),
        ),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
