// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform backends that upload with `multipart/form-data`.
//!
//! Three shapes share the plumbing in [`multipart`]:
//! - [`WeiboBackend`] — cookie auth with its own response quirks;
//! - [`CookieSiteBackend`] — the table-driven cookie sites (jd, nowcoder,
//!   zhihu, bilibili, chaoxing);
//! - [`ApiTokenBackend`] — token-header hosts (SM.MS, Imgur).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apitoken;
pub mod multipart;
mod weibo;

pub use apitoken::ApiTokenBackend;
pub use weibo::WeiboBackend;

use crate::multipart::{cookie_field, json_path, post_multipart};
use async_trait::async_trait;
use mpx_backend::{Backend, Probe, UploadRequest, ValidationReport, map_reqwest_err, shared_client};
use mpx_config::{BackendConfig, CookieParams, UserConfig};
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use std::collections::BTreeMap;
use std::time::Instant;

/// Protocol description of one cookie-authenticated site.
#[derive(Debug, Clone)]
pub struct SiteSpec {
    /// Backend id.
    pub id: BackendId,
    /// Multipart upload endpoint.
    pub upload_url: &'static str,
    /// Cheap authenticated GET used by `test_connection`.
    pub probe_url: &'static str,
    /// Form field carrying the file.
    pub file_field: &'static str,
    /// Cookie fields that must be present for the config to validate.
    pub required_cookie_fields: &'static [&'static str],
    /// Constant extra form fields.
    pub extra_fields: &'static [(&'static str, &'static str)],
    /// Cookie field copied into a form field (bilibili's csrf dance).
    pub csrf: Option<(&'static str, &'static str)>,
    /// JSON path to the fetchable URL in the response.
    pub url_path: &'static [&'static str],
}

/// The compiled-in cookie sites.
pub const SITE_SPECS: &[SiteSpec] = &[
    SiteSpec {
        id: BackendId::Jd,
        upload_url: "https://imio.jd.com/uploadfile/file/post.do?appId=im.customer",
        probe_url: "https://imio.jd.com/uploadfile/ping",
        file_field: "file",
        required_cookie_fields: &["pin"],
        extra_fields: &[("aid", "undefined"), ("clientType", "comet")],
        csrf: None,
        url_path: &["path"],
    },
    SiteSpec {
        id: BackendId::Nowcoder,
        upload_url: "https://www.nowcoder.com/chat/upload-img",
        probe_url: "https://www.nowcoder.com/nccommon/profile/me",
        file_field: "file",
        required_cookie_fields: &["t"],
        extra_fields: &[],
        csrf: None,
        url_path: &["url"],
    },
    SiteSpec {
        id: BackendId::Zhihu,
        upload_url: "https://www.zhihu.com/api/v4/uploaded_images",
        probe_url: "https://www.zhihu.com/api/v4/me",
        file_field: "file",
        required_cookie_fields: &["z_c0"],
        extra_fields: &[("source", "article")],
        csrf: None,
        url_path: &["src"],
    },
    SiteSpec {
        id: BackendId::Bilibili,
        upload_url: "https://api.bilibili.com/x/dynamic/feed/draw/upload_bfs",
        probe_url: "https://api.bilibili.com/x/web-interface/nav",
        file_field: "file_up",
        required_cookie_fields: &["SESSDATA", "bili_jct"],
        extra_fields: &[("category", "daily")],
        csrf: Some(("bili_jct", "csrf")),
        url_path: &["data", "image_url"],
    },
    SiteSpec {
        id: BackendId::Chaoxing,
        upload_url: "https://pan-yz.chaoxing.com/upload",
        probe_url: "https://pan-yz.chaoxing.com/api/token/uservalid",
        file_field: "file",
        required_cookie_fields: &["_uid"],
        extra_fields: &[],
        csrf: None,
        url_path: &["data", "previewUrl"],
    },
];

/// Look up the spec for a cookie site.
pub fn site_spec(id: BackendId) -> Option<&'static SiteSpec> {
    SITE_SPECS.iter().find(|s| s.id == id)
}

/// Table-driven cookie-authenticated backend.
#[derive(Debug)]
pub struct CookieSiteBackend {
    spec: SiteSpec,
    params: CookieParams,
    client: reqwest::Client,
    upload_url: String,
    probe_url: String,
}

impl CookieSiteBackend {
    /// Build from the config snapshot for one of the [`SITE_SPECS`] ids.
    pub fn from_config(id: BackendId, config: &UserConfig) -> Result<Self, UploadError> {
        let spec = site_spec(id)
            .cloned()
            .ok_or(UploadError::UnknownBackend { backend_id: id })?;
        let params = match config.backend(id) {
            Some(BackendConfig::Jd(p))
            | Some(BackendConfig::Nowcoder(p))
            | Some(BackendConfig::Zhihu(p))
            | Some(BackendConfig::Bilibili(p))
            | Some(BackendConfig::Chaoxing(p)) => p.clone(),
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
}

#[async_trait]
impl Backend for CookieSiteBackend {
    fn id(&self) -> BackendId {
        self.spec.id
    }

    fn validate(&self) -> ValidationReport {
        let cookie = self.params.cookie.trim();
        if cookie.is_empty() {
            return ValidationReport::fail_one(format!("{} cookie is empty", self.spec.id));
        }
        let missing: Vec<String> = self
            .spec
            .required_cookie_fields
            .iter()
            .filter(|f| cookie_field(cookie, f).is_none())
            .map(|f| format!("{} cookie is missing {f}", self.spec.id))
            .collect();
        if missing.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::fail(missing)
        }
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
            .map_err(|e| map_reqwest_err(self.spec.id, e))?;
        if matches!(resp.status().as_u16(), 401 | 403) {
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

        let mut extra: Vec<(String, String)> = self
            .spec
            .extra_fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some((cookie_name, form_name)) = self.spec.csrf {
            let token = cookie_field(&self.params.cookie, cookie_name).ok_or_else(|| {
                UploadError::CredentialExpired {
                    backend_id: self.spec.id,
                }
            })?;
            extra.push((form_name.to_string(), token));
        }

        let body = post_multipart(
            self.spec.id,
            &self.client,
            &self.upload_url,
            self.spec.file_field,
            &extra,
            &[(
                reqwest::header::COOKIE.to_string(),
                self.params.cookie.clone(),
            )],
            &req,
            true,
        )
        .await?;

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
