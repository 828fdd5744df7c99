// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end S3 backend tests against a mock server.

use mpx_backend::{Backend, CancelToken, UploadRequest};
use mpx_backend_s3::{ObjectOps, S3Backend};
use mpx_config::{BackendConfig, S3Params, UserConfig};
use mpx_core::BackendId;
use std::io::Write;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> UserConfig {
    let mut config = UserConfig::default();
    config.backends.insert(
        BackendId::R2,
        BackendConfig::R2(S3Params {
            account: "acct".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            bucket: "imgs".into(),
            region: "auto".into(),
            path_prefix: "".into(),
            public_domain: Some("img.example.com".into()),
            enabled: true,
        }),
    );
    config
}

fn temp_png(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("pic.png");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(&[0u8; 4096]).unwrap();
    path
}

#[tokio::test]
async fn upload_puts_signed_object_and_reports_full_progress() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-content-sha256"))
        .and(header_exists("x-amz-date"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = S3Backend::from_config(BackendId::R2, &config())
        .unwrap()
        .with_endpoint(server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let (tx, mut rx) = mpx_progress::channel();
    let sink = tx.sink(uuid::Uuid::new_v4(), BackendId::R2);
    let req = UploadRequest::new(&file, sink, CancelToken::new());

    let result = backend.upload(req).await.unwrap();
    assert_eq!(result.backend_id, BackendId::R2);
    assert_eq!(result.size_bytes, 4096);
    assert!(result.url.starts_with("https://img.example.com/"));
    assert!(result.url.ends_with(".png"));

    drop(tx);
    let mut saw_zero = false;
    let mut max = 0;
    while let Some(u) = rx.try_recv() {
        if u.progress.uploaded_bytes == 0 {
            saw_zero = true;
        }
        max = max.max(u.progress.uploaded_bytes);
    }
    assert!(saw_zero, "no open event");
    assert_eq!(max, 4096, "no completion event");
}

#[tokio::test]
async fn forbidden_maps_to_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
        .mount(&server)
        .await;

    let backend = S3Backend::from_config(BackendId::R2, &config())
        .unwrap()
        .with_endpoint(server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let req = UploadRequest::new(
        &file,
        mpx_progress::ProgressSink::disabled(BackendId::R2),
        CancelToken::new(),
    );
    let err = backend.upload(req).await.unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILURE");
}

#[tokio::test]
async fn cancelled_upload_returns_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
        .mount(&server)
        .await;

    let backend = S3Backend::from_config(BackendId::R2, &config())
        .unwrap()
        .with_endpoint(server.uri());

    let dir = tempfile::tempdir().unwrap();
    let file = temp_png(&dir);
    let cancel = CancelToken::new();
    let req = UploadRequest::new(
        &file,
        mpx_progress::ProgressSink::disabled(BackendId::R2),
        cancel.clone(),
    );

    let handle = tokio::spawn(async move { backend.upload(req).await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    cancel.cancel();
    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "CANCELLED");
}

#[tokio::test]
async fn list_objects_pages_with_continuation_tokens() {
    let server = MockServer::start().await;
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok-2</NextContinuationToken>
  <Contents>
    <Key>pics/a.png</Key>
    <Size>123</Size>
    <LastModified>2024-05-01T10:00:00.000Z</LastModified>
    <ETag>&quot;abc&quot;</ETag>
  </Contents>
  <CommonPrefixes><Prefix>pics/sub/</Prefix></CommonPrefixes>
</ListBucketResult>"#;
    Mock::given(method("GET"))
        .and(path("/imgs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .mount(&server)
        .await;

    let backend = S3Backend::from_config(BackendId::R2, &config())
        .unwrap()
        .with_endpoint(server.uri());

    let page = backend.list_objects("pics/", 50, None).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].key, "pics/a.png");
    assert_eq!(page.entries[0].size, 123);
    assert_eq!(page.entries[0].etag.as_deref(), Some("abc"));
    assert_eq!(page.common_prefixes, vec!["pics/sub/".to_string()]);
    assert_eq!(page.next_token.as_deref(), Some("tok-2"));
}

#[tokio::test]
async fn delete_objects_partitions_successes_and_failures() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/imgs/good.png"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/imgs/bad.png"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let backend = S3Backend::from_config(BackendId::R2, &config())
        .unwrap()
        .with_endpoint(server.uri());

    let outcome = backend
        .delete_objects(&["good.png".to_string(), "bad.png".to_string()])
        .await
        .unwrap();
    assert_eq!(outcome.deleted, vec!["good.png".to_string()]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, "bad.png");
}

#[tokio::test]
async fn test_connection_reports_latency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>"),
        )
        .mount(&server)
        .await;

    let backend = S3Backend::from_config(BackendId::R2, &config())
        .unwrap()
        .with_endpoint(server.uri());
    let probe = backend.test_connection().await.unwrap();
    assert!(probe.latency_ms < 10_000);
}
