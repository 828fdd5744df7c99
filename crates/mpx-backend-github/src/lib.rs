// SPDX-License-Identifier: MIT OR Apache-2.0
//! GitHub contents-API backend.
//!
//! Uploads are a single `PUT /repos/{owner}/{repo}/contents/{path}` with a
//! base64 payload; the canonical URL is the raw.githubusercontent rendering
//! of the committed path. CDN mirroring happens in the link-format layer,
//! not here.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mpx_backend::{
    Backend, Probe, UploadRequest, ValidationReport, map_reqwest_err, shared_client, status_error,
};
use mpx_config::{BackendConfig, GithubParams, UserConfig};
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use mpx_progress::TransferReporter;
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

const API_BASE: &str = "https://api.github.com";

/// The API insists on a User-Agent.
const USER_AGENT: &str = "mirrorpix";

/// GitHub backend.
#[derive(Debug)]
pub struct GithubBackend {
    params: GithubParams,
    client: reqwest::Client,
    api_base: String,
}

impl GithubBackend {
    /// Build from the config snapshot.
    pub fn from_config(config: &UserConfig) -> Result<Self, UploadError> {
        let params = match config.backend(BackendId::Github) {
            Some(BackendConfig::Github(p)) => p.clone(),
            _ => return Err(UploadError::NoConfiguredBackend),
        };
        Ok(Self {
            params,
            client: shared_client().clone(),
            api_base: API_BASE.into(),
        })
    }

    /// Override the API base; used by tests.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn repo_path(&self, file_name: &str) -> String {
        let ext = std::path::Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "bin".into());
        let mut prefix = self.params.path_prefix.trim_matches('/').to_string();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        let now = chrono::Utc::now();
        format!(
            "{prefix}{}/{}.{ext}",
            now.format("%Y/%m"),
            Uuid::new_v4().simple()
        )
    }

    fn raw_url(&self, path: &str) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{path}",
            self.params.owner, self.params.repo, self.params.branch
        )
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{path}",
            self.api_base, self.params.owner, self.params.repo
        )
    }
}

#[async_trait]
impl Backend for GithubBackend {
    fn id(&self) -> BackendId {
        BackendId::Github
    }

    fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();
        if self.params.token.trim().is_empty() {
            errors.push("github config is missing token".to_string());
        }
        if self.params.owner.is_empty() {
            errors.push("github config is missing owner".to_string());
        }
        if self.params.repo.is_empty() {
            errors.push("github config is missing repo".to_string());
        }
        if let Some(cdn) = self.params.cdn_config.as_ref().filter(|c| c.enabled) {
            match cdn.active_template() {
                None => errors.push("github cdn has no selected template".to_string()),
                Some(tpl) => {
                    if let Err(e) = mpx_link::validate_cdn_template(tpl) {
                        errors.push(format!("github cdn template invalid: {e}"));
                    }
                }
            }
        }
        if errors.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::fail(errors)
        }
    }

    async fn test_connection(&self) -> Result<Probe, UploadError> {
        let started = Instant::now();
        let url = format!(
            "{}/repos/{}/{}",
            self.api_base, self.params.owner, self.params.repo
        );
        let send = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("token {}", self.params.token))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send();
        let resp = tokio::time::timeout(mpx_backend::PROBE_TIMEOUT, send)
            .await
            .map_err(|_| UploadError::Timeout {
                stage: mpx_error::TimeoutStage::Request,
            })?
            .map_err(|e| map_reqwest_err(BackendId::Github, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(BackendId::Github, status, &body, false));
        }
        Ok(Probe {
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn upload(&self, req: UploadRequest) -> Result<UploadResult, UploadError> {
        req.cancel.check()?;
        let data = req.read_file().await?;
        let size = data.len() as u64;
        let path = self.repo_path(&req.file_name);

        let mut reporter = TransferReporter::start(req.sink.clone(), size);
        let body = serde_json::json!({
            "message": format!("upload {}", req.file_name),
            "content": BASE64.encode(&data),
            "branch": self.params.branch,
        });
        reporter.record(size / 2);

        let send = self
            .client
            .put(self.contents_url(&path))
            .header(reqwest::header::AUTHORIZATION, format!("token {}", self.params.token))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = req.cancel.cancelled() => return Err(UploadError::Cancelled),
            resp = send => resp.map_err(|e| map_reqwest_err(BackendId::Github, e))?,
        };
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(BackendId::Github, status, &text, false));
        }
        reporter.finish();

        Ok(UploadResult {
            backend_id: BackendId::Github,
            file_key: path.clone(),
            url: self.raw_url(&path),
            size_bytes: size,
            width: None,
            height: None,
            metadata: BTreeMap::new(),
        })
    }

    fn public_url(&self, result: &UploadResult) -> String {
        self.raw_url(&result.file_key)
    }
}
