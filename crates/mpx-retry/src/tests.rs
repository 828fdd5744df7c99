// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry semantics against scripted backends.

use super::*;
use async_trait::async_trait;
use mpx_backend::{Backend, BackendRegistry, Probe, ValidationReport};
use mpx_core::{AttemptStatus, ImageMeta, UploadResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Backend whose success is flipped at runtime, as if the user re-logged in
/// between attempts.
#[derive(Debug)]
struct SwitchableBackend {
    id: BackendId,
    healthy: Arc<AtomicBool>,
}

#[async_trait]
impl Backend for SwitchableBackend {
    fn id(&self) -> BackendId {
        self.id
    }
    fn validate(&self) -> ValidationReport {
        ValidationReport::ok()
    }
    async fn test_connection(&self) -> Result<Probe, UploadError> {
        Ok(Probe { latency_ms: 1 })
    }
    async fn upload(&self, _req: UploadRequest) -> Result<UploadResult, UploadError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(UploadResult {
                backend_id: self.id,
                file_key: format!("{}/fixed", self.id),
                url: format!("https://{}.example/fixed.png", self.id),
                size_bytes: 1,
                width: None,
                height: None,
                metadata: BTreeMap::new(),
            })
        } else {
            Err(UploadError::CredentialExpired {
                backend_id: self.id,
            })
        }
    }
    fn public_url(&self, result: &UploadResult) -> String {
        result.url.clone()
    }
}

struct Fixture {
    manager: RetryManager,
    store: HistoryStore,
    config: UserConfig,
    weibo_healthy: Arc<AtomicBool>,
    r2_healthy: Arc<AtomicBool>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("pic.png");
    std::fs::write(&file, [0u8; 32]).unwrap();

    let weibo_healthy = Arc::new(AtomicBool::new(false));
    let r2_healthy = Arc::new(AtomicBool::new(true));

    let mut registry = BackendRegistry::new();
    for (id, healthy) in [
        (BackendId::Weibo, Arc::clone(&weibo_healthy)),
        (BackendId::R2, Arc::clone(&r2_healthy)),
    ] {
        registry.register(id, move |_| {
            Ok(Box::new(SwitchableBackend {
                id,
                healthy: Arc::clone(&healthy),
            }) as Box<dyn Backend>)
        });
    }

    let store = HistoryStore::open_in_memory().unwrap();
    let mut config = UserConfig::default();
    config.enabled_backends = vec![BackendId::Weibo, BackendId::R2];

    // Seed: weibo failed, r2 succeeded, r2 is primary (scenario-2 shape).
    let record = HistoryRecord {
        id: "rec".into(),
        timestamp_ms: 1_700_000_000_000,
        local_file_name: "pic.png".into(),
        file_path: Some(file.to_string_lossy().into_owned()),
        primary_backend: BackendId::R2,
        results: vec![
            BackendAttempt::failed(BackendId::Weibo, "weibo: session credential expired"),
            BackendAttempt::success(UploadResult {
                backend_id: BackendId::R2,
                file_key: "r2/orig".into(),
                url: "https://r2.example/orig.png".into(),
                size_bytes: 32,
                width: None,
                height: None,
                metadata: BTreeMap::new(),
            }),
        ],
        generated_link: "https://r2.example/orig.png".into(),
        image_meta: ImageMeta::default(),
        link_check_status: None,
    };
    store.insert(&record).unwrap();

    let manager = RetryManager::new(
        Dispatcher::new(Arc::new(registry)),
        store.clone(),
    )
    .with_precheck(NetworkPrecheck::assume_online());

    Fixture {
        manager,
        store,
        config,
        weibo_healthy,
        r2_healthy,
        _dir: dir,
    }
}

#[tokio::test]
async fn single_retry_repairs_entry_without_reelecting_primary() {
    let fx = fixture();
    fx.weibo_healthy.store(true, Ordering::SeqCst);

    let (progress, _rx) = mpx_progress::channel();
    let updated = fx
        .manager
        .retry_single(
            "rec",
            BackendId::Weibo,
            &fx.config,
            &progress,
            CancelToken::new(),
        )
        .await
        .unwrap();

    let weibo = updated
        .results
        .iter()
        .find(|a| a.backend_id == BackendId::Weibo)
        .unwrap();
    assert_eq!(weibo.status, AttemptStatus::Success);

    // Primary and link unchanged (scenario 4).
    let stored = fx.store.get_by_id("rec").unwrap().unwrap();
    assert_eq!(stored.primary_backend, BackendId::R2);
    assert_eq!(stored.generated_link, "https://r2.example/orig.png");
}

#[tokio::test]
async fn failed_single_retry_records_the_latest_error() {
    let fx = fixture();
    // Weibo still broken.
    let (progress, _rx) = mpx_progress::channel();
    let err = fx
        .manager
        .retry_single(
            "rec",
            BackendId::Weibo,
            &fx.config,
            &progress,
            CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetryError::Upload(UploadError::CredentialExpired { .. })
    ));

    let stored = fx.store.get_by_id("rec").unwrap().unwrap();
    let weibo = stored
        .results
        .iter()
        .find(|a| a.backend_id == BackendId::Weibo)
        .unwrap();
    assert_eq!(weibo.status, AttemptStatus::Failed);
    assert!(weibo.error.as_deref().unwrap().contains("re-login"));
}

#[tokio::test]
async fn retry_of_unattempted_backend_is_rejected() {
    let fx = fixture();
    let (progress, _rx) = mpx_progress::channel();
    let err = fx
        .manager
        .retry_single(
            "rec",
            BackendId::Github,
            &fx.config,
            &progress,
            CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetryError::UnknownAttempt {
            backend_id: BackendId::Github,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn full_retry_backs_off_exponentially_and_replaces_results() {
    let fx = fixture();
    let (progress, _rx) = mpx_progress::channel();

    // First retry: weibo still broken, r2 healthy — dispatch partially
    // succeeds, results replaced, one attempt consumed.
    let started = tokio::time::Instant::now();
    let (updated, outcome) = fx
        .manager
        .retry_all("rec", &fx.config, &progress, CancelToken::new())
        .await
        .unwrap();
    let first_delay = started.elapsed();
    let (lo, hi) = backoff_bounds(0);
    assert!(first_delay >= lo, "first delay {first_delay:?} under {lo:?}");
    assert!(first_delay <= hi + std::time::Duration::from_millis(100));
    assert!(outcome.is_partial_success);
    assert_eq!(updated.primary_backend, BackendId::R2);
    assert_eq!(fx.manager.retry_count("rec"), 1);

    // Cookie fixed between attempts.
    fx.weibo_healthy.store(true, Ordering::SeqCst);

    let started = tokio::time::Instant::now();
    let (updated, _outcome) = fx
        .manager
        .retry_all("rec", &fx.config, &progress, CancelToken::new())
        .await
        .unwrap();
    let second_delay = started.elapsed();
    let (lo, hi) = backoff_bounds(1);
    assert!(second_delay >= lo, "second delay {second_delay:?} under {lo:?}");
    assert!(second_delay <= hi + std::time::Duration::from_millis(100));

    // All results replaced; primary re-elected to the first in input order.
    assert!(updated.results.iter().all(|a| a.is_success()));
    assert_eq!(updated.primary_backend, BackendId::Weibo);
    assert_eq!(
        updated.generated_link,
        "https://weibo.example/fixed.png"
    );
    assert_eq!(fx.manager.retry_count("rec"), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_rejected_without_increment() {
    let fx = fixture();
    let manager = fx.manager.with_max_retries(0);
    let (progress, _rx) = mpx_progress::channel();
    let err = manager
        .retry_all("rec", &fx.config, &progress, CancelToken::new())
        .await
        .unwrap_err();
    match err {
        RetryError::Exhausted {
            retry_count,
            max_retries,
        } => {
            assert_eq!(retry_count, 0);
            assert_eq!(max_retries, 0);
        }
        other => panic!("expected Exhausted, got {other}"),
    }
    assert_eq!(manager.retry_count("rec"), 0);
}

#[tokio::test]
async fn conflicting_retries_are_rejected() {
    let fx = fixture();
    // Hold a full-retry key, then try a single for the same record.
    let _guard = fx
        .manager
        .inflight
        .try_acquire(RetryKey::Full("rec".into()))
        .unwrap();
    let (progress, _rx) = mpx_progress::channel();
    let err = fx
        .manager
        .retry_single(
            "rec",
            BackendId::Weibo,
            &fx.config,
            &progress,
            CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::InFlight { .. }));
    assert!(fx.manager.is_record_busy("rec"));
}

#[tokio::test]
async fn deleted_source_file_refuses_the_retry() {
    let fx = fixture();
    // Simulate the user deleting the image after the upload.
    let path = fx
        .store
        .get_by_id("rec")
        .unwrap()
        .unwrap()
        .file_path
        .unwrap();
    std::fs::remove_file(&path).unwrap();

    let (progress, _rx) = mpx_progress::channel();
    let err = fx
        .manager
        .retry_single(
            "rec",
            BackendId::Weibo,
            &fx.config,
            &progress,
            CancelToken::new(),
        )
        .await
        .unwrap_err();
    match err {
        RetryError::Upload(inner) => {
            assert_eq!(inner.code(), "FILE_SYSTEM");
            assert!(!inner.is_recoverable());
        }
        other => panic!("expected FileSystem error, got {other}"),
    }
    // No counter was consumed and the record is untouched.
    assert_eq!(fx.manager.retry_count("rec"), 0);
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let fx = fixture();
    let (progress, _rx) = mpx_progress::channel();
    let err = fx
        .manager
        .retry_single(
            "ghost",
            BackendId::Weibo,
            &fx.config,
            &progress,
            CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetryError::History(HistoryError::NotFound { .. })
    ));
}
