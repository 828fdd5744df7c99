// SPDX-License-Identifier: MIT OR Apache-2.0
//! API-token multipart hosts: SM.MS and Imgur.

use crate::multipart::{json_path, post_multipart};
use async_trait::async_trait;
use mpx_backend::{Backend, Probe, UploadRequest, ValidationReport, map_reqwest_err, shared_client};
use mpx_config::{ApiTokenParams, BackendConfig, UserConfig};
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use std::collections::BTreeMap;
use std::time::Instant;

/// Protocol description of one token-header host.
#[derive(Debug, Clone)]
struct TokenSpec {
    id: BackendId,
    upload_url: &'static str,
    probe_url: &'static str,
    file_field: &'static str,
    /// `{token}` is replaced by the configured API token.
    auth_format: &'static str,
    url_path: &'static [&'static str],
}

const SMMS: TokenSpec = TokenSpec {
    id: BackendId::Smms,
    upload_url: "https://sm.ms/api/v2/upload",
    probe_url: "https://sm.ms/api/v2/profile",
    file_field: "smfile",
    auth_format: "{token}",
    url_path: &["data", "url"],
};

const IMGUR: TokenSpec = TokenSpec {
    id: BackendId::Imgur,
    upload_url: "https://api.imgur.com/3/image",
    probe_url: "https://api.imgur.com/3/credits",
    file_field: "image",
    auth_format: "Client-ID {token}",
    url_path: &["data", "link"],
};

/// Token-header multipart backend.
#[derive(Debug)]
pub struct ApiTokenBackend {
    spec: TokenSpec,
    params: ApiTokenParams,
    client: reqwest::Client,
    upload_url: String,
    probe_url: String,
}

impl ApiTokenBackend {
    /// Build from the config snapshot for SM.MS or Imgur.
    pub fn from_config(id: BackendId, config: &UserConfig) -> Result<Self, UploadError> {
        let spec = match id {
            BackendId::Smms => SMMS,
            BackendId::Imgur => IMGUR,
            other => return Err(UploadError::UnknownBackend { backend_id: other }),
        };
        let params = match config.backend(id) {
            Some(BackendConfig::Smms(p)) | Some(BackendConfig::Imgur(p)) => p.clone(),
            _ => return Err(UploadError::NoConfiguredBackend),
        };
        let upload_url = spec.upload_url.to_string();
        let probe_url = spec.probe_url.to_string();
        Ok(Self {
            spec,
            params,
            client: shared_client().clone(),
            upload_url,
            probe_url,
        })
    }

    /// Override the endpoints; used by tests.
    pub fn with_urls(mut self, upload_url: impl Into<String>, probe_url: impl Into<String>) -> Self {
        self.upload_url = upload_url.into();
        self.probe_url = probe_url.into();
        self
    }

    fn auth_value(&self) -> String {
        self.spec.auth_format.replace("{token}", &self.params.api_token)
    }
}

#[async_trait]
impl Backend for ApiTokenBackend {
    fn id(&self) -> BackendId {
        self.spec.id
    }

    fn validate(&self) -> ValidationReport {
        if self.params.api_token.trim().is_empty() {
            ValidationReport::fail_one(format!("{} api token is empty", self.spec.id))
        } else {
            ValidationReport::ok()
        }
    }

    async fn test_connection(&self) -> Result<Probe, UploadError> {
        let started = Instant::now();
        let send = self
            .client
            .get(&self.probe_url)
            .header(reqwest::header::AUTHORIZATION, self.auth_value())
            .send();
        let resp = tokio::time::timeout(mpx_backend::PROBE_TIMEOUT, send)
            .await
            .map_err(|_| UploadError::Timeout {
                stage: mpx_error::TimeoutStage::Request,
            })?
            .map_err(|e| map_reqwest_err(self.spec.id, e))?;
        if matches!(resp.status().as_u16(), 401 | 403) {
            return Err(UploadError::AuthFailure {
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

        let body = post_multipart(
            self.spec.id,
            &self.client,
            &self.upload_url,
            self.spec.file_field,
            &[],
            &[(
                reqwest::header::AUTHORIZATION.to_string(),
                self.auth_value(),
            )],
            &req,
            false,
        )
        .await?;

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|_| UploadError::protocol(self.spec.id, "response is not JSON"))?;
        let url = json_path(&value, self.spec.url_path)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                let message = value
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("no URL in response");
                UploadError::protocol(self.spec.id, message)
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
