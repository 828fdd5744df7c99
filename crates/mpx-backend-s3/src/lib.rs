// SPDX-License-Identifier: MIT OR Apache-2.0
//! S3-compatible object-store backends.
//!
//! One implementation covers R2, Tencent COS, Aliyun OSS, and Qiniu: they
//! differ only in endpoint synthesis and path style, and all accept SigV4.
//! Upyun speaks its own REST dialect and lives in [`upyun`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod sign;
mod upyun;
mod xmlscan;

pub use sign::{SigningContext, encode_uri_path, payload_hash, sign_request};
pub use upyun::UpyunBackend;

use async_trait::async_trait;
use mpx_backend::{
    Backend, CancelToken, Probe, UploadRequest, ValidationReport, map_reqwest_err, shared_client,
    status_error,
};
use mpx_config::{BackendConfig, S3Params, UserConfig};
use mpx_core::{BackendId, UploadResult};
use mpx_error::UploadError;
use mpx_progress::TransferReporter;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

/// Streaming chunk size for request bodies.
const BODY_CHUNK: usize = 64 * 1024;

/// One object in a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified timestamp as reported by the service.
    pub last_modified: String,
    /// Entity tag, when reported.
    pub etag: Option<String>,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects on this page.
    pub entries: Vec<ObjectEntry>,
    /// Collapsed prefixes under the requested delimiter.
    pub common_prefixes: Vec<String>,
    /// Token for the next page, when truncated.
    pub next_token: Option<String>,
}

/// Outcome of a bulk delete.
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// Keys that were removed.
    pub deleted: Vec<String>,
    /// Keys that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// Browse/manage operations shared by the object-store backends.
#[async_trait]
pub trait ObjectOps: Send + Sync {
    /// List objects under `prefix`, one page at a time.
    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, UploadError>;

    /// Delete many objects, partitioning successes from failures.
    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteOutcome, UploadError>;
}

/// Endpoint and path conventions per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    R2,
    TencentCos,
    AliyunOss,
    Qiniu,
}

impl Provider {
    fn for_id(id: BackendId) -> Option<Self> {
        match id {
            BackendId::R2 => Some(Self::R2),
            BackendId::Tencent => Some(Self::TencentCos),
            BackendId::Aliyun => Some(Self::AliyunOss),
            BackendId::Qiniu => Some(Self::Qiniu),
            _ => None,
        }
    }

    fn endpoint(&self, p: &S3Params) -> String {
        match self {
            Self::R2 => format!("https://{}.r2.cloudflarestorage.com", p.account),
            Self::TencentCos => format!(
                "https://{}-{}.cos.{}.myqcloud.com",
                p.bucket, p.account, p.region
            ),
            Self::AliyunOss => format!("https://{}.oss-{}.aliyuncs.com", p.bucket, p.region),
            Self::Qiniu => format!("https://s3.{}.qiniucs.com", p.region),
        }
    }

    /// Whether the bucket rides in the host (virtual-host style) or the path.
    fn path_style(&self) -> bool {
        matches!(self, Self::R2 | Self::Qiniu)
    }
}

/// SigV4 object-store backend.
#[derive(Debug)]
pub struct S3Backend {
    id: BackendId,
    provider: Provider,
    params: S3Params,
    client: reqwest::Client,
    endpoint_override: Option<String>,
}

impl S3Backend {
    /// Build from the config snapshot, failing when the id has no matching
    /// S3-family entry.
    pub fn from_config(id: BackendId, config: &UserConfig) -> Result<Self, UploadError> {
        let provider = Provider::for_id(id).ok_or(UploadError::UnknownBackend { backend_id: id })?;
        let params = match config.backend(id) {
            Some(BackendConfig::R2(p))
            | Some(BackendConfig::Tencent(p))
            | Some(BackendConfig::Aliyun(p))
            | Some(BackendConfig::Qiniu(p)) => p.clone(),
            _ => {
                return Err(UploadError::NoConfiguredBackend);
            }
        };
        Ok(Self {
            id,
            provider,
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
            .unwrap_or_else(|| self.provider.endpoint(&self.params))
    }

    fn host(&self) -> String {
        let endpoint = self.endpoint();
        endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .unwrap_or(&endpoint)
            .to_string()
    }

    fn object_path(&self, key: &str) -> String {
        if self.provider.path_style() {
            format!("/{}/{}", self.params.bucket, key)
        } else {
            format!("/{key}")
        }
    }

    fn signing_context(&self) -> SigningContext<'_> {
        SigningContext {
            access_key_id: &self.params.access_key_id,
            secret_access_key: &self.params.secret_access_key,
            region: &self.params.region,
        }
    }

    fn object_key(&self, file_name: &str) -> String {
        let ext = std::path::Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "bin".into());
        let now = chrono::Utc::now();
        let mut prefix = self.params.path_prefix.trim_matches('/').to_string();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        format!(
            "{prefix}{}/{}.{ext}",
            now.format("%Y/%m"),
            Uuid::new_v4().simple()
        )
    }

    fn url_for(&self, key: &str) -> String {
        if let Some(domain) = &self.params.public_domain {
            let domain = domain.trim_end_matches('/');
            if domain.starts_with("http") {
                format!("{domain}/{key}")
            } else {
                format!("https://{domain}/{key}")
            }
        } else {
            format!("{}{}", self.endpoint(), self.object_path(key))
        }
    }

    fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        body_hash: &str,
    ) -> reqwest::RequestBuilder {
        let headers = sign_request(
            &self.signing_context(),
            method.as_str(),
            &self.host(),
            path,
            query,
            body_hash,
            chrono::Utc::now(),
        );
        let url = format!("{}{}", self.endpoint(), encode_uri_path(path));
        self.client
            .request(method, url)
            .query(query)
            .header("x-amz-date", headers.amz_date)
            .header("x-amz-content-sha256", headers.content_sha256)
            .header("authorization", headers.authorization)
    }

    /// List one page of objects with `/` as the delimiter.
    async fn list_page(
        &self,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, UploadError> {
        let mut query: Vec<(String, String)> = vec![
            ("list-type".into(), "2".into()),
            ("delimiter".into(), "/".into()),
            ("max-keys".into(), max_keys.to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix".into(), prefix.to_string()));
        }
        if let Some(token) = continuation_token {
            query.push(("continuation-token".into(), token.to_string()));
        }

        let path = if self.provider.path_style() {
            format!("/{}", self.params.bucket)
        } else {
            "/".to_string()
        };
        let req = self.signed_request(reqwest::Method::GET, &path, &query, &payload_hash(b""));
        let resp = req
            .send()
            .await
            .map_err(|e| map_reqwest_err(self.id, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| map_reqwest_err(self.id, e))?;
        if !status.is_success() {
            return Err(status_error(self.id, status, &body, false));
        }

        let mut page = ObjectPage::default();
        for block in xmlscan::all_blocks(&body, "Contents") {
            let Some(key) = xmlscan::first_tag(block, "Key") else {
                continue;
            };
            page.entries.push(ObjectEntry {
                key: xmlscan::unescape(key),
                size: xmlscan::first_tag(block, "Size")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                last_modified: xmlscan::first_tag(block, "LastModified")
                    .unwrap_or_default()
                    .to_string(),
                etag: xmlscan::first_tag(block, "ETag")
                    .map(|t| xmlscan::unescape(t).trim_matches('"').to_string()),
            });
        }
        for block in xmlscan::all_blocks(&body, "CommonPrefixes") {
            if let Some(p) = xmlscan::first_tag(block, "Prefix") {
                page.common_prefixes.push(xmlscan::unescape(p));
            }
        }
        let truncated = xmlscan::first_tag(&body, "IsTruncated") == Some("true");
        if truncated {
            page.next_token = xmlscan::first_tag(&body, "NextContinuationToken")
                .map(|t| xmlscan::unescape(t));
        }
        Ok(page)
    }

    /// Delete a single object.
    pub async fn delete_object(&self, key: &str) -> Result<(), UploadError> {
        let path = self.object_path(key);
        let req = self.signed_request(reqwest::Method::DELETE, &path, &[], &payload_hash(b""));
        let resp = req
            .send()
            .await
            .map_err(|e| map_reqwest_err(self.id, e))?;
        let status = resp.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(self.id, status, &body, false))
    }
}

/// Stream `data` as a request body, recording progress per chunk and racing
/// against cancellation. Shared with the Upyun backend.
pub(crate) async fn send_with_progress(
    backend_id: BackendId,
    builder: reqwest::RequestBuilder,
    data: Vec<u8>,
    reporter: Arc<Mutex<TransferReporter>>,
    cancel: &CancelToken,
) -> Result<reqwest::Response, UploadError> {
    let total = data.len();
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Vec<u8>, std::io::Error>>(4);
    let feeder_reporter = Arc::clone(&reporter);
    tokio::spawn(async move {
        let mut offset = 0;
        while offset < total {
            let end = (offset + BODY_CHUNK).min(total);
            let chunk = data[offset..end].to_vec();
            let n = chunk.len() as u64;
            if tx.send(Ok(chunk)).await.is_err() {
                return;
            }
            if let Ok(mut rep) = feeder_reporter.lock() {
                rep.record(n);
            }
            offset = end;
        }
    });

    let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
    let send = builder
        .header(reqwest::header::CONTENT_LENGTH, total as u64)
        .body(body)
        .send();

    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        resp = send => resp.map_err(|e| map_reqwest_err(backend_id, e)),
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn validate(&self) -> ValidationReport {
        let missing = self.params.missing_fields();
        if missing.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::fail(
                missing
                    .iter()
                    .map(|f| format!("{} config is missing {f}", self.id))
                    .collect(),
            )
        }
    }

    async fn test_connection(&self) -> Result<Probe, UploadError> {
        let started = Instant::now();
        let probe = tokio::time::timeout(mpx_backend::PROBE_TIMEOUT, self.list_page("", 1, None));
        match probe.await {
            Ok(Ok(_)) => Ok(Probe {
                latency_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(UploadError::Timeout {
                stage: mpx_error::TimeoutStage::Request,
            }),
        }
    }

    async fn upload(&self, req: UploadRequest) -> Result<UploadResult, UploadError> {
        req.cancel.check()?;
        let data = req.read_file().await?;
        let size = data.len() as u64;
        let key = self.object_key(&req.file_name);
        let content_type = req.content_type();
        debug!(backend = %self.id, %key, size, "putting object");

        let reporter = Arc::new(Mutex::new(TransferReporter::start(req.sink.clone(), size)));
        let hash = payload_hash(&data);
        let path = self.object_path(&key);
        let builder = self
            .signed_request(reqwest::Method::PUT, &path, &[], &hash)
            .header(reqwest::header::CONTENT_TYPE, content_type);

        let resp = send_with_progress(self.id, builder, data, Arc::clone(&reporter), &req.cancel)
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(self.id, status, &body, false));
        }
        if let Ok(mut rep) = reporter.lock() {
            rep.finish();
        }

        let url = self.url_for(&key);
        Ok(UploadResult {
            backend_id: self.id,
            file_key: key,
            url,
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
impl ObjectOps for S3Backend {
    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, UploadError> {
        self.list_page(prefix, max_keys, continuation_token).await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<DeleteOutcome, UploadError> {
        let mut outcome = DeleteOutcome::default();
        for key in keys {
            match self.delete_object(key).await {
                Ok(()) => outcome.deleted.push(key.clone()),
                Err(e) => outcome.failed.push((key.clone(), e.to_string())),
            }
        }
        Ok(outcome)
    }
}
