// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command implementations for the mirrorpix CLI.

use crate::format;
use anyhow::{Context, Result, bail};
use mpx_backend::CancelToken;
use mpx_config::{ConfigStore, sanitize_config};
use mpx_core::{AttemptStatus, BackendId, QueueItem, SessionQueue, SlotStatus};
use mpx_dispatch::{DispatchError, DispatchRequest, Dispatcher, run_upload_job};
use mpx_history::HistoryStore;
use mpx_retry::{NetworkPrecheck, RetryManager};
use mpx_sidecar::FetcherClient;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Shared context every command runs in.
pub struct App {
    /// Config store.
    pub config: std::sync::Arc<ConfigStore>,
    /// History store.
    pub history: HistoryStore,
    /// Dispatcher over the standard registry.
    pub dispatcher: Dispatcher,
    /// Sidecar binary path.
    pub fetcher: PathBuf,
}

/// Upload files to every enabled backend, printing progress and links.
///
/// Each file gets one [`QueueItem`] in a [`SessionQueue`]; the queue consumes
/// the dispatch's progress channel (registering each `upload_id` the first
/// time it is seen, dropping out-of-order updates) and its per-backend slots
/// back both the live progress bars and the final summary.
pub async fn upload(app: &App, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("nothing to upload");
    }
    let config = app.config.snapshot().await;

    for file in files {
        let (progress, mut rx) = mpx_progress::channel();
        let item_id = file.display().to_string();
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| item_id.clone());

        let mut queue = SessionQueue::new();
        queue.push(QueueItem::new(
            item_id.clone(),
            item_id.clone(),
            file_name,
            config.enabled_backends.clone(),
        ));

        // The queue task owns the consumer side: it maps upload ids back to
        // the item, filters regressions, and renders each slot's percent.
        let consumer_item = item_id.clone();
        let consumer = tokio::spawn(async move {
            let mut shown: HashMap<BackendId, u8> = HashMap::new();
            while let Some(update) = rx.recv().await {
                queue.register_upload(update.upload_id, &consumer_item, update.backend_id);
                if !queue.apply(&update) {
                    continue;
                }
                let Some(slot) = queue
                    .get(&consumer_item)
                    .and_then(|item| item.per_backend.get(&update.backend_id))
                else {
                    continue;
                };
                if shown.get(&update.backend_id) == Some(&slot.percent) {
                    continue;
                }
                shown.insert(update.backend_id, slot.percent);
                eprintln!(
                    "  {:<9} {}",
                    update.backend_id.as_str(),
                    format::percent_bar(slot.percent, 24)
                );
            }
            queue
        });

        let request = DispatchRequest {
            file_path: file.clone(),
            enabled_backends: config.enabled_backends.clone(),
            config: config.clone(),
            progress,
            cancel: CancelToken::new(),
        };

        println!("{}:", file.display());
        match run_upload_job(&app.dispatcher, &app.history, request).await {
            Ok((record, outcome)) => {
                let mut queue = consumer.await.unwrap_or_default();
                settle_queue_item(&mut queue, &item_id, &record);

                println!("  link: {}", record.generated_link);
                for item in queue.iter() {
                    for backend in &item.enabled_backends {
                        let Some(slot) = item.per_backend.get(backend) else {
                            continue;
                        };
                        if slot.status == SlotStatus::Failed {
                            println!(
                                "  warning: {backend} failed: {}",
                                slot.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                    }
                }
                for backend in &outcome.credential_expired {
                    println!("  note: {backend} session expired — re-login to repair");
                }
            }
            Err(err) => {
                let _ = consumer.await;
                match &err {
                    DispatchError::AllFailed {
                        credential_expired, ..
                    } => {
                        eprintln!("{err}");
                        for backend in credential_expired {
                            eprintln!("  note: {backend} session expired — re-login required");
                        }
                    }
                    other => eprintln!("upload failed: {other}"),
                }
                return Err(err.into());
            }
        }
    }
    Ok(())
}

/// Fold the persisted record back into the queue item: terminal slot states,
/// per-backend links and errors, the primary URL, and the overall status.
fn settle_queue_item(queue: &mut SessionQueue, item_id: &str, record: &mpx_core::HistoryRecord) {
    let Some(item) = queue.get_mut(item_id) else {
        return;
    };
    item.primary_url = Some(record.generated_link.clone());
    for attempt in &record.results {
        let Some(slot) = item.per_backend.get_mut(&attempt.backend_id) else {
            continue;
        };
        match attempt.status {
            AttemptStatus::Success => {
                slot.status = SlotStatus::Success;
                slot.percent = 100;
                slot.link = attempt.result.as_ref().map(|r| r.url.clone());
                slot.error = None;
            }
            AttemptStatus::Failed => {
                slot.status = SlotStatus::Failed;
                slot.error = attempt.error.clone();
            }
        }
    }
    item.recompute_overall();
}

/// Probe one backend, or every configured one.
pub async fn probe(app: &App, backend: Option<BackendId>) -> Result<()> {
    let config = app.config.snapshot().await;
    let targets: Vec<BackendId> = match backend {
        Some(id) => vec![id],
        None => config.backends.keys().copied().collect(),
    };
    if targets.is_empty() {
        bail!("no backends configured");
    }
    for id in targets {
        let instance = match app.dispatcher.registry().create(id, &config) {
            Ok(b) => b,
            Err(e) => {
                println!("{id:<9} unavailable: {e}");
                continue;
            }
        };
        let report = instance.validate();
        if !report.valid {
            println!("{id:<9} invalid config: {}", report.errors.join("; "));
            continue;
        }
        match instance.test_connection().await {
            Ok(p) => println!("{id:<9} ok ({} ms)", p.latency_ms),
            Err(e) => println!("{id:<9} failed: {e}"),
        }
    }
    Ok(())
}

/// Print one page of history.
pub fn history_list(app: &App, page: u32, page_size: u32, backend: Option<BackendId>) -> Result<()> {
    let listed = app.history.get_page(page, page_size, backend)?;
    for record in &listed.records {
        println!("{}", format::record_line(record));
    }
    println!(
        "page {}/{} ({} records)",
        listed.page,
        listed.total.div_ceil(u64::from(page_size.max(1))).max(1),
        listed.total
    );
    Ok(())
}

/// Search history by file name or link substring.
pub fn history_search(
    app: &App,
    query: &str,
    backend: Option<BackendId>,
    limit: u32,
    offset: u32,
) -> Result<()> {
    let hits = app.history.search(query, backend, limit, offset)?;
    if hits.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for record in &hits {
        println!("{}", format::record_line(record));
    }
    Ok(())
}

/// Show one record in full.
pub fn history_show(app: &App, id: &str) -> Result<()> {
    let record = app
        .history
        .get_by_id(id)?
        .with_context(|| format!("no record with id '{id}'"))?;
    print!("{}", format::record_detail(&record));
    Ok(())
}

/// Print per-month counts.
pub fn history_stats(app: &App) -> Result<()> {
    let stats = app.history.get_time_period_stats()?;
    if stats.is_empty() {
        println!("history is empty");
    } else {
        println!("{}", format::stats_lines(&stats));
    }
    Ok(())
}

/// Delete records by id.
pub fn history_delete(app: &App, ids: &[String]) -> Result<()> {
    app.history.delete_many(ids)?;
    println!("deleted {} record(s)", ids.len());
    Ok(())
}

/// Clear all history.
pub fn history_clear(app: &App) -> Result<()> {
    app.history.clear()?;
    println!("history cleared");
    Ok(())
}

/// Retry a record: one backend, or the full set.
pub async fn retry(app: &App, record_id: &str, backend: Option<BackendId>) -> Result<()> {
    let config = app.config.snapshot().await;
    let manager = RetryManager::new(app.dispatcher.clone(), app.history.clone())
        .with_precheck(NetworkPrecheck::new());
    let (progress, mut rx) = mpx_progress::channel();
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    match backend {
        Some(backend_id) => {
            let updated = manager
                .retry_single(record_id, backend_id, &config, &progress, CancelToken::new())
                .await?;
            println!("repaired {backend_id}; link remains {}", updated.generated_link);
        }
        None => {
            let (updated, outcome) = manager
                .retry_all(record_id, &config, &progress, CancelToken::new())
                .await?;
            println!("retried all backends; primary {}", updated.primary_backend);
            println!("link: {}", updated.generated_link);
            if outcome.is_partial_success {
                warn!("some backends still failing");
            }
        }
    }
    Ok(())
}

/// Print the sanitised config.
pub async fn config_show(app: &App) -> Result<()> {
    let sanitized = sanitize_config(&app.config.snapshot().await);
    println!("{}", serde_json::to_string_pretty(&sanitized)?);
    Ok(())
}

/// Probe for a controllable browser via the sidecar.
pub async fn check_browser(app: &App) -> Result<()> {
    let client = FetcherClient::new(&app.fetcher);
    let info = client
        .check_browser()
        .await
        .context("sidecar invocation failed")?;
    if info.installed {
        println!(
            "browser found: {} ({})",
            info.name.as_deref().unwrap_or("unknown"),
            info.path.as_deref().unwrap_or("unknown path")
        );
    } else {
        println!("no controllable browser found");
    }
    Ok(())
}
