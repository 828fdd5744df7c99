// SPDX-License-Identifier: MIT OR Apache-2.0
//! Upyun USS backend.
//!
//! Upyun's REST API predates S3 compatibility: Basic auth against
//! `v0.api.upyun.com`, and a tab-separated line format for listings.

use crate::{DeleteOutcome, ObjectEntry, ObjectOps, ObjectPage, send_with_progress};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mpx_backend::{
    Backend, Probe, UploadRequest, ValidationReport, map_reqwest_err, shared_client, status_error,
};
use mpx_config::{BackendConfig, UpyunParams, UserConfig};
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use mpx_progress::TransferReporter;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

const DEFAULT_ENDPOINT: &str = "https://v0.api.upyun.com";

/// Upyun storage backend.
#[derive(Debug)]
pub struct UpyunBackend {
    params: UpyunParams,
    client: reqwest::Client,
    endpoint_override: Option<String>,
}

impl UpyunBackend {
    /// Build from the config snapshot.
    pub fn from_config(config: &UserConfig) -> Result<Self, UploadError> {
        let params = match config.backend(BackendId::Upyun) {
            Some(BackendConfig::Upyun(p)) => p.clone(),
            _ => return Err(UploadError::NoConfiguredBackend),
        };
        Ok(Self {
            params,
            client: shared_client().clone(),
            endpoint_override: None,
        })
    }

    /// Point the backend at a different endpoint; used by tests.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint(&self) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    fn auth_header(&self) -> String {
        let token = BASE64.encode(format!(
            "{}:{}",
            self.params.operator, self.params.password
        ));
        format!("Basic {token}")
    }

    fn object_key(&self, file_name: &str) -> String {
        let ext = std::path::Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "bin".into());
        let mut prefix = self.params.path_prefix.trim_matches('/').to_string();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        format!("{prefix}{}.{ext}", Uuid::new_v4().simple())
    }

    fn url_for(&self, key: &str) -> String {
        let domain = self.params.domain.trim_end_matches('/');
        if domain.starts_with("http") {
            format!("{domain}/{key}")
        } else {
            format!("https://{domain}/{key}")
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint(), self.params.bucket, key)
    }
}

#[async_trait]
impl Backend for UpyunBackend {
    fn id(&self) -> BackendId {
        BackendId::Upyun
    }

    fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();
        if self.params.operator.is_empty() {
            errors.push("upyun config is missing operator".into());
        }
        if self.params.password.is_empty() {
            errors.push("upyun config is missing password".into());
        }
        if self.params.bucket.is_empty() {
            errors.push("upyun config is missing bucket".into());
        }
        if self.params.domain.is_empty() {
            errors.push("upyun config is missing domain".into());
        }
        if errors.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::fail(errors)
        }
    }

    async fn test_connection(&self) -> Result<Probe, UploadError> {
        let started = Instant::now();
        let url = format!("{}/{}/?usage", self.endpoint(), self.params.bucket);
        let send = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send();
        let resp = tokio::time::timeout(mpx_backend::PROBE_TIMEOUT, send)
            .await
            .map_err(|_| UploadError::Timeout {
                stage: mpx_error::TimeoutStage::Request,
            })?
            .map_err(|e| map_reqwest_err(BackendId::Upyun, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(BackendId::Upyun, status, &body, false));
        }
        Ok(Probe {
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn upload(&self, req: UploadRequest) -> Result<UploadResult, UploadError> {
        req.cancel.check()?;
        let data = req.read_file().await?;
        let size = data.len() as u64;
        let key = self.object_key(&req.file_name);

        let reporter = Arc::new(Mutex::new(TransferReporter::start(req.sink.clone(), size)));
        let builder = self
            .client
            .put(self.object_url(&key))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .header(reqwest::header::CONTENT_TYPE, req.content_type())
            .header("x-upyun-meta-filename", req.file_name.clone());

        let resp = send_with_progress(
            BackendId::Upyun,
            builder,
            data,
            Arc::clone(&reporter),
            &req.cancel,
        )
        .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(BackendId::Upyun, status, &body, false));
        }
        if let Ok(mut rep) = reporter.lock() {
            rep.finish();
        }

        Ok(UploadResult {
            backend_id: BackendId::Upyun,
            file_key: key.clone(),
            url: self.url_for(&key),
            size_bytes: size,
            width: None,
            height: None,
            metadata: BTreeMap::new(),
        })
    }

    fn public_url(&self, result: &UploadResult) -> String {
        self.url_for(&result.file_key)
    }
}

#[async_trait]
impl ObjectOps for UpyunBackend {
    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, UploadError> {
        let dir = prefix.trim_matches('/');
        let url = format!("{}/{}/{dir}/", self.endpoint(), self.params.bucket);
        let mut builder = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .header("x-list-limit", max_keys.to_string());
        if let Some(iter) = continuation_token {
            builder = builder.header("x-list-iter", iter.to_string());
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| map_reqwest_err(BackendId::Upyun, e))?;
        let status = resp.status();
        let next_token = resp
            .headers()
            .get("x-upyun-list-iter")
            .and_then(|v| v.to_str().ok())
            .filter(|v| *v != "g2gCZAAEbmV4dGQAA2VvZg")
            .map(String::from);
        let body = resp
            .text()
            .await
            .map_err(|e| map_reqwest_err(BackendId::Upyun, e))?;
        if !status.is_success() {
            return Err(status_error(BackendId::Upyun, status, &body, false));
        }

        // Each line: name \t type(N|F) \t size \t mtime
        let mut page = ObjectPage {
            next_token,
            ..ObjectPage::default()
        };
        for line in body.lines().filter(|l| !l.is_empty()) {
            let mut cols = line.split('\t');
            let (Some(name), kind, size, mtime) =
                (cols.next(), cols.next(), cols.next(), cols.next())
            else {
                continue;
            };
            let full = if dir.is_empty() {
                name.to_string()
            } else {
                format!("{dir}/{name}")
            };
            if kind == Some("F") {
                page.common_prefixes.push(format!("{full}/"));
            } else {
                page.entries.push(ObjectEntry {
                    key: full,
                    size: size.and_then(|s| s.parse().ok()).unwrap_or(0),
                    last_modified: mtime.unwrap_or_default().to_string(),
                    etag: None,
                });
            }
        }
        Ok(page)
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteOutcome, UploadError> {
        let mut outcome = DeleteOutcome::default();
        for key in keys {
            let resp = self
                .client
                .delete(self.object_url(key))
                .header(reqwest::header::AUTHORIZATION, self.auth_header())
                .send()
                .await
                .map_err(|e| map_reqwest_err(BackendId::Upyun, e))?;
            let status = resp.status();
            if status.is_success() || status.as_u16() == 404 {
                outcome.deleted.push(key.clone());
            } else {
                let body = resp.text().await.unwrap_or_default();
                outcome.failed.push((
                    key.clone(),
                    status_error(BackendId::Upyun, status, &body, false).to_string(),
                ));
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> UpyunBackend {
        let mut config = UserConfig::default();
        config.backends.insert(
            BackendId::Upyun,
            BackendConfig::Upyun(UpyunParams {
                operator: "op".into(),
                password: "pw".into(),
                bucket: "imgs".into(),
                domain: "imgs.test.upcdn.net".into(),
                path_prefix: "pics".into(),
                enabled: true,
            }),
        );
        UpyunBackend::from_config(&config).unwrap()
    }

    #[test]
    fn auth_header_is_basic_base64() {
        assert_eq!(
            backend().auth_header(),
            format!("Basic {}", BASE64.encode("op:pw"))
        );
    }

    #[test]
    fn urls_use_the_bound_domain() {
        let b = backend();
        assert_eq!(
            b.url_for("pics/x.png"),
            "https://imgs.test.upcdn.net/pics/x.png"
        );
        assert!(b.object_url("pics/x.png").ends_with("/imgs/pics/x.png"));
    }

    #[test]
    fn validation_lists_every_missing_field() {
        let mut config = UserConfig::default();
        config.backends.insert(
            BackendId::Upyun,
            BackendConfig::Upyun(UpyunParams::default()),
        );
        let report = UpyunBackend::from_config(&config).unwrap().validate();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 4);
    }
}
