// SPDX-License-Identifier: MIT OR Apache-2.0
//! Weibo picture upload.
//!
//! The oldest backend in the fleet and the one with the quirkiest protocol:
//! a multipart POST authenticated by the browser cookie, a JSON body buried
//! in a JSONP-ish wrapper, and the documented error code `100006` when the
//! cookie has expired.

use crate::multipart::{json_path, post_multipart};
use async_trait::async_trait;
use mpx_backend::{Backend, Probe, UploadRequest, ValidationReport, map_reqwest_err, shared_client};
use mpx_config::{BackendConfig, CookieParams, UserConfig};
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use std::collections::BTreeMap;
use std::time::Instant;

const UPLOAD_URL: &str =
    "https://picupload.weibo.com/interface/pic_upload.php?app=miniblog&data=json&url=0&markpos=1&logo=0&nick=0&marks=0&mime=image/jpeg";

const PROBE_URL: &str = "https://weibo.com/ajax/profile/info";

/// The documented "cookie expired" code.
const COOKIE_EXPIRED_CODE: &str = "100006";

/// CDN host used for canonical picture links.
const CDN_HOST: &str = "tvax1.sinaimg.cn";

/// Weibo backend.
#[derive(Debug)]
pub struct WeiboBackend {
    params: CookieParams,
    client: reqwest::Client,
    upload_url: String,
    probe_url: String,
}

impl WeiboBackend {
    /// Build from the config snapshot.
    pub fn from_config(config: &UserConfig) -> Result<Self, UploadError> {
        let params = match config.backend(BackendId::Weibo) {
            Some(BackendConfig::Weibo(p)) => p.clone(),
            _ => return Err(UploadError::NoConfiguredBackend),
        };
        Ok(Self {
            params,
            client: shared_client().clone(),
            upload_url: UPLOAD_URL.into(),
            probe_url: PROBE_URL.into(),
        })
    }

    /// Override the endpoints; used by tests.
    pub fn with_urls(mut self, upload_url: impl Into<String>, probe_url: impl Into<String>) -> Self {
        self.upload_url = upload_url.into();
        self.probe_url = probe_url.into();
        self
    }

    /// Canonical CDN URL for a pid.
    pub fn pid_url(pid: &str) -> String {
        format!("https://{CDN_HOST}/large/{pid}.jpg")
    }

    fn parse_pid(body: &str) -> Option<String> {
        // The JSON payload sits after a script-tag preamble on the real
        // endpoint; locate the first brace and parse from there.
        let json_start = body.find('{')?;
        let value: serde_json::Value = serde_json::from_str(&body[json_start..]).ok()?;
        json_path(&value, &["data", "pics", "pic_1", "pid"])
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

#[async_trait]
impl Backend for WeiboBackend {
    fn id(&self) -> BackendId {
        BackendId::Weibo
    }

    fn validate(&self) -> ValidationReport {
        if self.params.cookie.trim().is_empty() {
            return ValidationReport::fail_one("weibo cookie is empty");
        }
        if !self.params.cookie.contains("SUB=") {
            return ValidationReport::fail_one("weibo cookie must contain SUB=");
        }
        ValidationReport::ok()
    }

    async fn test_connection(&self) -> Result<Probe, UploadError> {
        let started = Instant::now();
        let send = self
            .client
            .get(&self.probe_url)
            .header(reqwest::header::COOKIE, self.params.cookie.clone())
            .send();
        let resp = tokio::time::timeout(mpx_backend::PROBE_TIMEOUT, send)
            .await
            .map_err(|_| UploadError::Timeout {
                stage: mpx_error::TimeoutStage::Request,
            })?
            .map_err(|e| map_reqwest_err(BackendId::Weibo, e))?;
        if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 {
            return Err(UploadError::CredentialExpired {
                backend_id: BackendId::Weibo,
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
            BackendId::Weibo,
            &self.client,
            &self.upload_url,
            "pic1",
            &[],
            &[(
                reqwest::header::COOKIE.to_string(),
                self.params.cookie.clone(),
            )],
            &req,
            true,
        )
        .await?;

        if body.contains(COOKIE_EXPIRED_CODE) {
            return Err(UploadError::CredentialExpired {
                backend_id: BackendId::Weibo,
            });
        }
        let pid = Self::parse_pid(&body).ok_or_else(|| {
            UploadError::protocol(BackendId::Weibo, format!("no pid in response: {body:.120}"))
        })?;

        Ok(UploadResult {
            backend_id: BackendId::Weibo,
            file_key: pid.clone(),
            url: Self::pid_url(&pid),
            size_bytes: size,
            width: None,
            height: None,
            metadata: BTreeMap::new(),
        })
    }

    fn public_url(&self, result: &UploadResult) -> String {
        Self::pid_url(&result.file_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_cookie(cookie: &str) -> UserConfig {
        let mut config = UserConfig::default();
        config.backends.insert(
            BackendId::Weibo,
            BackendConfig::Weibo(CookieParams {
                cookie: cookie.into(),
                enabled: true,
            }),
        );
        config
    }

    #[test]
    fn empty_cookie_is_invalid() {
        let b = WeiboBackend::from_config(&config_with_cookie("")).unwrap();
        assert!(!b.validate().valid);
    }

    #[test]
    fn cookie_without_sub_is_invalid() {
        let b = WeiboBackend::from_config(&config_with_cookie("SESSION=abc")).unwrap();
        let report = b.validate();
        assert!(!report.valid);
        assert!(report.errors[0].contains("SUB="));
    }

    #[test]
    fn cookie_with_sub_is_valid() {
        let b = WeiboBackend::from_config(&config_with_cookie("SUB=abc; SUBP=def")).unwrap();
        assert!(b.validate().valid);
    }

    #[test]
    fn pid_parses_from_wrapped_json() {
        let body = r#"<script>document.domain</script>{"code":"A00006","data":{"pics":{"pic_1":{"pid":"007abcDEgy1"}}}}"#;
        assert_eq!(WeiboBackend::parse_pid(body).as_deref(), Some("007abcDEgy1"));
    }

    #[test]
    fn pid_url_uses_the_cdn_host() {
        assert_eq!(
            WeiboBackend::pid_url("007abc"),
            "https://tvax1.sinaimg.cn/large/007abc.jpg"
        );
    }
}
