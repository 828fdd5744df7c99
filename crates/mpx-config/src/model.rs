// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed configuration model.

use crate::ConfigError;
use mpx_core::BackendId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Cookie-authenticated backend parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieParams {
    /// Full browser cookie string for the backend's domain.
    pub cookie: String,
    /// Whether the backend participates in dispatch.
    #[serde(default)]
    pub enabled: bool,
}

/// S3-compatible object-store parameters.
///
/// `account` is the provider-specific account scope: the Cloudflare account
/// id for R2, the APPID suffix for COS, and so on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Params {
    /// Provider account identifier.
    pub account: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Bucket name.
    pub bucket: String,
    /// Region (provider-specific format).
    pub region: String,
    /// Key prefix inside the bucket, without leading slash.
    #[serde(default)]
    pub path_prefix: String,
    /// Public domain for generated links, overriding the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_domain: Option<String>,
    /// Whether the backend participates in dispatch.
    #[serde(default)]
    pub enabled: bool,
}

impl S3Params {
    /// The five fields every S3-family config must carry.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.account.is_empty() {
            missing.push("account");
        }
        if self.access_key_id.is_empty() {
            missing.push("access_key_id");
        }
        if self.secret_access_key.is_empty() {
            missing.push("secret_access_key");
        }
        if self.bucket.is_empty() {
            missing.push("bucket");
        }
        if self.region.is_empty() {
            missing.push("region");
        }
        missing
    }
}

/// Upyun USS parameters (operator/password auth instead of SigV4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpyunParams {
    /// Service operator name.
    pub operator: String,
    /// Operator password.
    pub password: String,
    /// Service (bucket) name.
    pub bucket: String,
    /// Bound public domain.
    pub domain: String,
    /// Key prefix inside the service.
    #[serde(default)]
    pub path_prefix: String,
    /// Whether the backend participates in dispatch.
    #[serde(default)]
    pub enabled: bool,
}

/// CDN mirror configuration for the GitHub backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Whether link rendering substitutes the CDN template.
    pub enabled: bool,
    /// Candidate templates; each must contain `{owner}`, `{repo}`,
    /// `{branch}`, and `{path}`.
    pub templates: Vec<String>,
    /// Index of the active template.
    pub selected_index: usize,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            templates: vec![
                "https://cdn.jsdelivr.net/gh/{owner}/{repo}@{branch}/{path}".into(),
                "https://cdn.statically.io/gh/{owner}/{repo}/{branch}/{path}".into(),
            ],
            selected_index: 0,
        }
    }
}

impl CdnConfig {
    /// The active template, when the index is in range.
    pub fn active_template(&self) -> Option<&str> {
        self.templates.get(self.selected_index).map(String::as_str)
    }
}

/// GitHub contents-API parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubParams {
    /// Personal access token with `repo` scope.
    pub token: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Target branch.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Path prefix inside the repository.
    #[serde(default)]
    pub path_prefix: String,
    /// CDN mirror settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_config: Option<CdnConfig>,
    /// Whether the backend participates in dispatch.
    #[serde(default)]
    pub enabled: bool,
}

fn default_branch() -> String {
    "main".into()
}

/// API-token backend parameters (SM.MS, Imgur).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTokenParams {
    /// Issued API token.
    pub api_token: String,
    /// Whether the backend participates in dispatch.
    #[serde(default)]
    pub enabled: bool,
}

/// Long-lived auth-token backend parameters (nami).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokenParams {
    /// Auth token captured at login.
    pub auth_token: String,
    /// Whether the backend participates in dispatch.
    #[serde(default)]
    pub enabled: bool,
}

/// Per-backend configuration, tagged by backend id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Weibo cookie config.
    Weibo(CookieParams),
    /// JD cookie config.
    Jd(CookieParams),
    /// Nowcoder cookie config.
    Nowcoder(CookieParams),
    /// Zhihu cookie config.
    Zhihu(CookieParams),
    /// Bilibili cookie config.
    Bilibili(CookieParams),
    /// Chaoxing cookie config.
    Chaoxing(CookieParams),
    /// Qiyu cookie config (token fetched per upload by the sidecar).
    Qiyu(CookieParams),
    /// Cloudflare R2.
    R2(S3Params),
    /// Tencent COS.
    Tencent(S3Params),
    /// Aliyun OSS.
    Aliyun(S3Params),
    /// Qiniu Kodo.
    Qiniu(S3Params),
    /// Upyun USS.
    Upyun(UpyunParams),
    /// GitHub contents API.
    Github(GithubParams),
    /// SM.MS.
    Smms(ApiTokenParams),
    /// Imgur.
    Imgur(ApiTokenParams),
    /// Nami.
    Nami(AuthTokenParams),
}

impl BackendConfig {
    /// The backend id this variant configures.
    pub fn id(&self) -> BackendId {
        match self {
            Self::Weibo(_) => BackendId::Weibo,
            Self::Jd(_) => BackendId::Jd,
            Self::Nowcoder(_) => BackendId::Nowcoder,
            Self::Zhihu(_) => BackendId::Zhihu,
            Self::Bilibili(_) => BackendId::Bilibili,
            Self::Chaoxing(_) => BackendId::Chaoxing,
            Self::Qiyu(_) => BackendId::Qiyu,
            Self::R2(_) => BackendId::R2,
            Self::Tencent(_) => BackendId::Tencent,
            Self::Aliyun(_) => BackendId::Aliyun,
            Self::Qiniu(_) => BackendId::Qiniu,
            Self::Upyun(_) => BackendId::Upyun,
            Self::Github(_) => BackendId::Github,
            Self::Smms(_) => BackendId::Smms,
            Self::Imgur(_) => BackendId::Imgur,
            Self::Nami(_) => BackendId::Nami,
        }
    }

    /// Whether this backend participates in dispatch.
    pub fn enabled(&self) -> bool {
        match self {
            Self::Weibo(p)
            | Self::Jd(p)
            | Self::Nowcoder(p)
            | Self::Zhihu(p)
            | Self::Bilibili(p)
            | Self::Chaoxing(p)
            | Self::Qiyu(p) => p.enabled,
            Self::R2(p) | Self::Tencent(p) | Self::Aliyun(p) | Self::Qiniu(p) => p.enabled,
            Self::Upyun(p) => p.enabled,
            Self::Github(p) => p.enabled,
            Self::Smms(p) | Self::Imgur(p) => p.enabled,
            Self::Nami(p) => p.enabled,
        }
    }

    /// Flip the enabled flag.
    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Self::Weibo(p)
            | Self::Jd(p)
            | Self::Nowcoder(p)
            | Self::Zhihu(p)
            | Self::Bilibili(p)
            | Self::Chaoxing(p)
            | Self::Qiyu(p) => p.enabled = enabled,
            Self::R2(p) | Self::Tencent(p) | Self::Aliyun(p) | Self::Qiniu(p) => {
                p.enabled = enabled
            }
            Self::Upyun(p) => p.enabled = enabled,
            Self::Github(p) => p.enabled = enabled,
            Self::Smms(p) | Self::Imgur(p) => p.enabled = enabled,
            Self::Nami(p) => p.enabled = enabled,
        }
    }
}

/// How generated links are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Canonical backend URL.
    #[default]
    Direct,
    /// Proxy-prefixed URL, for backends that support it.
    Proxied,
}

/// Proxy-prefix settings for proxied output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPrefixConfig {
    /// Whether prefixing is applied at all.
    #[serde(default)]
    pub enabled: bool,
    /// Candidate prefixes; the canonical URL is appended to the active one.
    #[serde(default)]
    pub prefix_list: Vec<String>,
    /// Index of the active prefix.
    #[serde(default)]
    pub selected_index: usize,
}

impl LinkPrefixConfig {
    /// The active prefix, when enabled and the index is in range.
    pub fn active_prefix(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.prefix_list.get(self.selected_index).map(String::as_str)
    }
}

/// One WebDAV config-sync profile (consumed by the sync collaborator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebdavProfile {
    /// Display name.
    pub name: String,
    /// Server URL.
    pub url: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Remote directory for synced files.
    #[serde(default)]
    pub remote_dir: String,
}

/// The versioned configuration aggregate owned by the session.
///
/// Unknown fields written by newer builds are preserved in `extra` across a
/// load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Shape version; bumped once per release that changes shape.
    pub config_version: u32,
    /// Backends actively dispatched to, in dispatch order.
    #[serde(default)]
    pub enabled_backends: Vec<BackendId>,
    /// Backends the UI may expose.
    #[serde(default)]
    pub available_backends: BTreeSet<BackendId>,
    /// Per-backend configuration.
    #[serde(default)]
    pub backends: BTreeMap<BackendId, BackendConfig>,
    /// Link rendering mode.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Proxy-prefix settings.
    #[serde(default)]
    pub link_prefix_config: LinkPrefixConfig,
    /// WebDAV sync profiles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webdav_sync: Vec<WebdavProfile>,
    /// UI theme name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    /// Whether anonymous usage analytics are enabled.
    #[serde(default)]
    pub analytics_enabled: bool,
    /// Auto-sync interval in minutes, when syncing is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sync_interval_minutes: Option<u32>,
    /// Fields this build does not understand, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            config_version: crate::CURRENT_CONFIG_VERSION,
            enabled_backends: Vec::new(),
            available_backends: BackendId::ALL.iter().copied().collect(),
            backends: BTreeMap::new(),
            output_format: OutputFormat::Direct,
            link_prefix_config: LinkPrefixConfig::default(),
            webdav_sync: Vec::new(),
            theme: None,
            analytics_enabled: false,
            auto_sync_interval_minutes: None,
            extra: BTreeMap::new(),
        }
    }
}

impl UserConfig {
    /// Look up a backend's config.
    pub fn backend(&self, id: BackendId) -> Option<&BackendConfig> {
        self.backends.get(&id)
    }

    /// Check the aggregate invariant: every id in `enabled_backends` has a
    /// config entry of the matching variant with `enabled = true`.
    pub fn check_invariants(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        for id in &self.enabled_backends {
            match self.backends.get(id) {
                None => reasons.push(format!("enabled backend {id} has no config entry")),
                Some(cfg) if cfg.id() != *id => {
                    reasons.push(format!("config entry for {id} has mismatched type"));
                }
                Some(cfg) if !cfg.enabled() => {
                    reasons.push(format!("enabled backend {id} is disabled in its config"));
                }
                Some(_) => {}
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { reasons })
        }
    }
}
