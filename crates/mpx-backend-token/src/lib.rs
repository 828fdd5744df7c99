// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backends whose upload tokens come from the credential sidecar.
//!
//! Qiyu hands out one-shot upload tokens that only a real browser session
//! can mint; nami accepts a long-lived auth token but expires it without
//! warning. Both upload as multipart with the token in a header, and both
//! evict their cached token the moment the server rejects it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use mpx_backend::{Backend, Probe, UploadRequest, ValidationReport, shared_client};
use mpx_backend_social::multipart::{json_path, post_multipart};
use mpx_config::{BackendConfig, UserConfig};
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use mpx_sidecar::{FetcherClient, TokenCache};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Source of short-lived upload tokens.
///
/// The production implementation shells out to the fetcher sidecar; tests
/// substitute a canned source.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Produce a token for `backend_id`, given its config entry as JSON.
    async fn acquire(
        &self,
        backend_id: BackendId,
        config: &serde_json::Value,
    ) -> Result<String, UploadError>;

    /// Forget any cached token for `backend_id`.
    fn invalidate(&self, backend_id: BackendId);
}

/// Sidecar-backed [`TokenSource`] with a TTL cache.
pub struct SidecarTokenSource {
    client: FetcherClient,
    cache: TokenCache,
}

impl SidecarTokenSource {
    /// Build around a fetcher client.
    pub fn new(client: FetcherClient) -> Self {
        Self {
            client,
            cache: TokenCache::new(),
        }
    }
}

#[async_trait]
impl TokenSource for SidecarTokenSource {
    async fn acquire(
        &self,
        backend_id: BackendId,
        config: &serde_json::Value,
    ) -> Result<String, UploadError> {
        if let Some(token) = self.cache.get(backend_id) {
            debug!(backend = %backend_id, "using cached upload token");
            return Ok(token);
        }
        let grant = self
            .client
            .fetch_token(backend_id, config)
            .await
            .map_err(|e| e.into_upload_error(backend_id))?;
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let ttl_ms = (grant.expires_ms - now_ms).max(0) as u64;
        self.cache
            .put(backend_id, grant.token.clone(), Duration::from_millis(ttl_ms));
        Ok(grant.token)
    }

    fn invalidate(&self, backend_id: BackendId) {
        self.cache.evict(backend_id);
    }
}

/// Protocol description of one token-dance site.
#[derive(Debug, Clone)]
struct TokenSiteSpec {
    id: BackendId,
    upload_url: &'static str,
    token_header: &'static str,
    file_field: &'static str,
    url_path: &'static [&'static str],
}

const QIYU: TokenSiteSpec = TokenSiteSpec {
    id: BackendId::Qiyu,
    upload_url: "https://qiyukf.com/webapi/file/upload",
    token_header: "Token",
    file_field: "file",
    url_path: &["url"],
};

const NAMI: TokenSiteSpec = TokenSiteSpec {
    id: BackendId::Nami,
    upload_url: "https://apng.onlinewebfonts.com/api/upload",
    token_header: "Auth-Token",
    file_field: "file",
    url_path: &["data", "url"],
};

/// Token-dance backend (qiyu, nami).
pub struct TokenBackend {
    spec: TokenSiteSpec,
    config_entry: serde_json::Value,
    configured_token: Option<String>,
    client: reqwest::Client,
    source: Arc<dyn TokenSource>,
    upload_url: String,
}

impl std::fmt::Debug for TokenBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBackend")
            .field("spec", &self.spec)
            .field("config_entry", &self.config_entry)
            .field("configured_token", &self.configured_token)
            .field("client", &self.client)
            .field("upload_url", &self.upload_url)
            .finish()
    }
}

impl TokenBackend {
    /// Build from the config snapshot.
    ///
    /// Nami with a configured `auth_token` never consults the sidecar; qiyu
    /// always does.
    pub fn from_config(
        id: BackendId,
        config: &UserConfig,
        source: Arc<dyn TokenSource>,
    ) -> Result<Self, UploadError> {
        let spec = match id {
            BackendId::Qiyu => QIYU,
            BackendId::Nami => NAMI,
            other => return Err(UploadError::UnknownBackend { backend_id: other }),
        };
        let (entry, configured_token) = match config.backend(id) {
            Some(entry @ BackendConfig::Qiyu(_)) => (entry, None),
            Some(entry @ BackendConfig::Nami(p)) => {
                let token = Some(p.auth_token.clone()).filter(|t| !t.trim().is_empty());
                (entry, token)
            }
            _ => return Err(UploadError::NoConfiguredBackend),
        };
        let config_entry = serde_json::to_value(entry).map_err(|e| UploadError::Unknown {
            message: format!("config entry not serialisable: {e}"),
        })?;
        let upload_url = spec.upload_url.to_string();
        Ok(Self {
            spec,
            config_entry,
            configured_token,
            client: shared_client().clone(),
            source,
            upload_url,
        })
    }

    /// Override the upload endpoint; used by tests.
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    async fn token(&self) -> Result<String, UploadError> {
        if let Some(token) = &self.configured_token {
            return Ok(token.clone());
        }
        self.source.acquire(self.spec.id, &self.config_entry).await
    }
}

#[async_trait]
impl Backend for TokenBackend {
    fn id(&self) -> BackendId {
        self.spec.id
    }

    fn validate(&self) -> ValidationReport {
        match self.spec.id {
            // Nami must carry a non-empty auth token.
            BackendId::Nami if self.configured_token.is_none() => {
                ValidationReport::fail_one("nami config is missing auth token")
            }
            // Qiyu needs nothing up front; the sidecar does the dance.
            _ => ValidationReport::ok(),
        }
    }

    async fn test_connection(&self) -> Result<Probe, UploadError> {
        // Token acquisition is the round-trip that can fail; a succeeding
        // acquisition proves both the sidecar and the session.
        let started = Instant::now();
        let fut = self.token();
        let token = tokio::time::timeout(mpx_backend::PROBE_TIMEOUT, fut)
            .await
            .map_err(|_| UploadError::Timeout {
                stage: mpx_error::TimeoutStage::Request,
            })??;
        if token.is_empty() {
            return Err(UploadError::CredentialExpired {
                backend_id: self.spec.id,
            });
        }
        Ok(Probe {
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn upload(&self, req: UploadRequest) -> Result<UploadResult, UploadError> {
        let size = tokio::fs::metadata(&req.file_path)
            .await
            .map_err(|e| UploadError::file_system("stat", &req.file_path, e))?
            .len();
        let token = self.token().await?;

        let outcome = post_multipart(
            self.spec.id,
            &self.client,
            &self.upload_url,
            self.spec.file_field,
            &[],
            &[(self.spec.token_header.to_string(), token)],
            &req,
            true,
        )
        .await;

        let body = match outcome {
            Ok(body) => body,
            Err(err) => {
                if matches!(err, UploadError::CredentialExpired { .. }) {
                    self.source.invalidate(self.spec.id);
                }
                return Err(err);
            }
        };

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|_| UploadError::protocol(self.spec.id, "response is not JSON"))?;
        let url = json_path(&value, self.spec.url_path)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                UploadError::protocol(
                    self.spec.id,
                    format!("no URL at {:?} in response", self.spec.url_path),
                )
            })?
            .to_string();

        Ok(UploadResult {
            backend_id: self.spec.id,
            file_key: url.clone(),
            url,
            size_bytes: size,
            width: None,
            height: None,
            metadata: BTreeMap::new(),
        })
    }

    fn public_url(&self, result: &UploadResult) -> String {
        result.url.clone()
    }
}
