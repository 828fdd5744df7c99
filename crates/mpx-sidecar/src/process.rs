// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fetcher process invocation.

use crate::{BrowserInfo, CookieGrant, SidecarError, SidecarResponse, TokenGrant};
use mpx_core::BackendId;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::warn;

/// Budget for one fetcher invocation.
pub const SIDECAR_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the `fetcher` binary.
///
/// One process per request; the child is killed when the budget runs out or
/// the client future is dropped, so no browser is ever left behind.
#[derive(Debug, Clone)]
pub struct FetcherClient {
    program: PathBuf,
    timeout: Duration,
}

impl FetcherClient {
    /// Client for the fetcher at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: SIDECAR_TIMEOUT,
        }
    }

    /// Override the invocation budget; used by tests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe for a controllable browser in the well-known install paths.
    pub async fn check_browser(&self) -> Result<BrowserInfo, SidecarError> {
        self.invoke(&["check-chrome"]).await
    }

    /// Capture a one-shot upload token for `backend_id`.
    ///
    /// The config value is the backend's own entry, serialised; the fetcher
    /// needs it for the login cookie that seeds the browser session.
    pub async fn fetch_token(
        &self,
        backend_id: BackendId,
        config: &serde_json::Value,
    ) -> Result<TokenGrant, SidecarError> {
        let config = config.to_string();
        self.invoke(&["fetch-token", "--backend", backend_id.as_str(), "--config", &config])
            .await
    }

    /// Capture a full cookie string for `site`.
    pub async fn fetch_cookie(&self, site: &str) -> Result<CookieGrant, SidecarError> {
        self.invoke(&["fetch-cookie", "--site", site]).await
    }

    async fn invoke<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, SidecarError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SidecarError::Spawn)?;

        // Forward stderr through tracing; the fetcher logs its browser
        // lifecycle there.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        warn!(target: "mpx_sidecar.stderr", "{line}");
                    }
                }
            });
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SidecarError::Protocol("stdout unavailable".into()))?;

        let run = async {
            let mut out = String::new();
            stdout
                .read_to_string(&mut out)
                .await
                .map_err(|e| SidecarError::Protocol(format!("stdout read failed: {e}")))?;
            let status = child
                .wait()
                .await
                .map_err(|e| SidecarError::Protocol(format!("wait failed: {e}")))?;
            Ok::<_, SidecarError>((out, status))
        };

        let timed = tokio::time::timeout(self.timeout, run).await;
        let (out, status) = match timed {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(SidecarError::Timeout);
            }
        };

        // Exactly one JSON object, possibly surrounded by stray blank lines.
        let line = out
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with('{'))
            .ok_or_else(|| SidecarError::Protocol("no JSON object on stdout".into()))?;
        let response: SidecarResponse<T> = serde_json::from_str(line)
            .map_err(|e| SidecarError::Protocol(format!("bad response: {e}")))?;

        if response.success {
            response
                .data
                .ok_or_else(|| SidecarError::Protocol("success without data".into()))
        } else if let Some(error) = response.error {
            Err(SidecarError::Failed(error))
        } else {
            Err(SidecarError::Exited {
                code: status.code(),
            })
        }
    }
}
