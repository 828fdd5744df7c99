// SPDX-License-Identifier: MIT OR Apache-2.0
//! Full-engine scenarios: real backend implementations against mock
//! servers, driven through the dispatcher, the history store, and the
//! retry manager.

use mpx_backend::{Backend, BackendRegistry, CancelToken};
use mpx_backend_s3::S3Backend;
use mpx_backend_social::WeiboBackend;
use mpx_config::{BackendConfig, CookieParams, S3Params, UserConfig};
use mpx_core::{AttemptStatus, BackendId};
use mpx_dispatch::{DispatchError, DispatchRequest, Dispatcher, run_upload_job};
use mpx_history::HistoryStore;
use mpx_progress::MonotonicGate;
use mpx_retry::{NetworkPrecheck, RetryManager};
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEIBO_OK: &str = r#"{"code":"A00000","data":{"pics":{"pic_1":{"pid":"007TestPid"}}}}"#;

fn config() -> UserConfig {
    let mut config = UserConfig::default();
    config.backends.insert(
        BackendId::Weibo,
        BackendConfig::Weibo(CookieParams {
            cookie: "SUB=abc; SUBP=def".into(),
            enabled: true,
        }),
    );
    config.backends.insert(
        BackendId::R2,
        BackendConfig::R2(S3Params {
            account: "acct".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            bucket: "imgs".into(),
            region: "auto".into(),
            path_prefix: String::new(),
            public_domain: Some("img.example.com".into()),
            enabled: true,
        }),
    );
    config.enabled_backends = vec![BackendId::Weibo, BackendId::R2];
    config
}

/// Registry whose weibo and r2 constructors point at mock servers.
fn registry(weibo_uri: String, r2_uri: String) -> Arc<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(BackendId::Weibo, move |cfg| {
        Ok(Box::new(
            WeiboBackend::from_config(cfg)?.with_urls(weibo_uri.clone(), weibo_uri.clone()),
        ) as Box<dyn Backend>)
    });
    registry.register(BackendId::R2, move |cfg| {
        Ok(
            Box::new(S3Backend::from_config(BackendId::R2, cfg)?.with_endpoint(r2_uri.clone()))
                as Box<dyn Backend>,
        )
    });
    Arc::new(registry)
}

fn temp_png(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("cat.png");
    std::fs::write(&path, [7u8; 8192]).unwrap();
    path
}

async fn weibo_server(body: &str, status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body.to_string()))
        .mount(&server)
        .await;
    server
}

async fn r2_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn all_backends_succeed_with_monotonic_progress() {
    let weibo = weibo_server(WEIBO_OK, 200).await;
    let r2 = r2_server(200).await;
    let dispatcher = Dispatcher::new(registry(weibo.uri(), r2.uri()));
    let store = HistoryStore::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let (progress, mut rx) = mpx_progress::channel();
    let request = DispatchRequest {
        file_path: temp_png(&dir),
        enabled_backends: vec![BackendId::Weibo, BackendId::R2],
        config: config(),
        progress,
        cancel: CancelToken::new(),
    };

    let (record, outcome) = run_upload_job(&dispatcher, &store, request).await.unwrap();

    assert_eq!(record.primary_backend, BackendId::Weibo);
    assert_eq!(
        record.generated_link,
        "https://tvax1.sinaimg.cn/large/007TestPid.jpg"
    );
    assert_eq!(record.results.len(), 2);
    assert!(record.results.iter().all(|a| a.is_success()));
    assert!(!outcome.is_partial_success);
    assert_eq!(record.image_meta.file_size, Some(8192));

    // Every stream is monotonic and ends at 100 %.
    let mut gate = MonotonicGate::new();
    let mut max_by_stream: HashMap<uuid::Uuid, (u64, u64)> = HashMap::new();
    while let Some(update) = rx.try_recv() {
        assert!(gate.accept(&update), "stream regressed: {update:?}");
        let entry = max_by_stream.entry(update.upload_id).or_insert((0, 0));
        entry.0 = entry.0.max(update.progress.uploaded_bytes);
        entry.1 = update.progress.total_bytes;
    }
    assert_eq!(max_by_stream.len(), 2);
    for (uploaded, total) in max_by_stream.values() {
        assert_eq!(uploaded, total, "a stream did not reach 100%");
    }
}

#[tokio::test]
async fn expired_weibo_falls_back_to_r2_as_primary() {
    let weibo = weibo_server(r#"{"code":"100006"}"#, 200).await;
    let r2 = r2_server(200).await;
    let dispatcher = Dispatcher::new(registry(weibo.uri(), r2.uri()));
    let store = HistoryStore::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let (progress, _rx) = mpx_progress::channel();
    let request = DispatchRequest {
        file_path: temp_png(&dir),
        enabled_backends: vec![BackendId::Weibo, BackendId::R2],
        config: config(),
        progress,
        cancel: CancelToken::new(),
    };

    let (record, outcome) = run_upload_job(&dispatcher, &store, request).await.unwrap();
    assert_eq!(record.primary_backend, BackendId::R2);
    assert!(record.generated_link.starts_with("https://img.example.com/"));
    assert!(outcome.is_partial_success);
    assert_eq!(outcome.credential_expired, vec![BackendId::Weibo]);

    let weibo_attempt = record
        .results
        .iter()
        .find(|a| a.backend_id == BackendId::Weibo)
        .unwrap();
    assert_eq!(weibo_attempt.status, AttemptStatus::Failed);
    assert!(weibo_attempt.error.as_deref().unwrap().contains("re-login"));
}

#[tokio::test]
async fn all_failures_write_no_record_and_list_errors_in_order() {
    let weibo = weibo_server("", 401).await;
    let r2 = r2_server(500).await;
    let dispatcher = Dispatcher::new(registry(weibo.uri(), r2.uri()));
    let store = HistoryStore::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let (progress, _rx) = mpx_progress::channel();
    let request = DispatchRequest {
        file_path: temp_png(&dir),
        enabled_backends: vec![BackendId::Weibo, BackendId::R2],
        config: config(),
        progress,
        cancel: CancelToken::new(),
    };

    let err = run_upload_job(&dispatcher, &store, request).await.unwrap_err();
    match &err {
        DispatchError::AllFailed {
            failures,
            credential_expired,
        } => {
            assert_eq!(failures[0].0, BackendId::Weibo);
            assert_eq!(failures[1].0, BackendId::R2);
            assert_eq!(credential_expired, &vec![BackendId::Weibo]);
        }
        other => panic!("expected AllFailed, got {other}"),
    }
    assert_eq!(store.get_page(1, 10, None).unwrap().total, 0);
}

#[tokio::test]
async fn single_retry_repairs_weibo_after_relogin() {
    // First dispatch: weibo expired, r2 fine.
    let weibo = weibo_server(r#"{"code":"100006"}"#, 200).await;
    let r2 = r2_server(200).await;
    let dispatcher = Dispatcher::new(registry(weibo.uri(), r2.uri()));
    let store = HistoryStore::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let (progress, _rx) = mpx_progress::channel();
    let request = DispatchRequest {
        file_path: temp_png(&dir),
        enabled_backends: vec![BackendId::Weibo, BackendId::R2],
        config: config(),
        progress,
        cancel: CancelToken::new(),
    };
    let (record, _outcome) = run_upload_job(&dispatcher, &store, request).await.unwrap();
    let original_link = record.generated_link.clone();

    // "Re-login": the weibo mock now accepts the upload.
    weibo.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WEIBO_OK))
        .mount(&weibo)
        .await;

    let manager = RetryManager::new(dispatcher, store.clone())
        .with_precheck(NetworkPrecheck::assume_online());
    let (progress, _rx) = mpx_progress::channel();
    let updated = manager
        .retry_single(
            &record.id,
            BackendId::Weibo,
            &config(),
            &progress,
            CancelToken::new(),
        )
        .await
        .unwrap();

    let weibo_attempt = updated
        .results
        .iter()
        .find(|a| a.backend_id == BackendId::Weibo)
        .unwrap();
    assert_eq!(weibo_attempt.status, AttemptStatus::Success);

    // Primary and link unchanged by a targeted repair.
    let stored = store.get_by_id(&record.id).unwrap().unwrap();
    assert_eq!(stored.primary_backend, BackendId::R2);
    assert_eq!(stored.generated_link, original_link);
}

#[tokio::test]
async fn full_retry_reelects_primary_after_fix() {
    // Seed a record where weibo failed and r2 carried the upload.
    let weibo = weibo_server(r#"{"code":"100006"}"#, 200).await;
    let r2 = r2_server(200).await;
    let dispatcher = Dispatcher::new(registry(weibo.uri(), r2.uri()));
    let store = HistoryStore::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let (progress, _rx) = mpx_progress::channel();
    let request = DispatchRequest {
        file_path: temp_png(&dir),
        enabled_backends: vec![BackendId::Weibo, BackendId::R2],
        config: config(),
        progress,
        cancel: CancelToken::new(),
    };
    let (record, _) = run_upload_job(&dispatcher, &store, request).await.unwrap();

    weibo.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WEIBO_OK))
        .mount(&weibo)
        .await;

    let manager = RetryManager::new(dispatcher, store.clone())
        .with_precheck(NetworkPrecheck::assume_online());
    let (progress, _rx) = mpx_progress::channel();
    let (updated, outcome) = manager
        .retry_all(&record.id, &config(), &progress, CancelToken::new())
        .await
        .unwrap();

    // Results wholly replaced; weibo is first in input order, so it takes
    // the primary slot and the link is overwritten.
    assert!(!outcome.is_partial_success);
    assert_eq!(updated.primary_backend, BackendId::Weibo);
    assert_eq!(
        updated.generated_link,
        "https://tvax1.sinaimg.cn/large/007TestPid.jpg"
    );
    assert_eq!(manager.retry_count(&record.id), 1);
}
