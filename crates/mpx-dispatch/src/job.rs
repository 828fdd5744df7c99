// SPDX-License-Identifier: MIT OR Apache-2.0
//! The full upload job: dispatch, probe metadata, persist history.

use crate::{DispatchError, DispatchOutcome, DispatchRequest, Dispatcher};
use mpx_core::{HistoryRecord, ImageMeta, probe_image_metadata};
use mpx_history::HistoryStore;
use tracing::warn;
use uuid::Uuid;

/// Run one upload end to end and persist the outcome.
///
/// A cancelled or all-failed dispatch writes nothing; partial success is a
/// normal, persisted outcome — the failed attempts stay on the record so a
/// targeted retry can repair them later.
pub async fn run_upload_job(
    dispatcher: &Dispatcher,
    store: &HistoryStore,
    req: DispatchRequest,
) -> Result<(HistoryRecord, DispatchOutcome), DispatchError> {
    let file_path = req.file_path.clone();
    let outcome = dispatcher.dispatch(req).await?;

    let meta_path = file_path.clone();
    let image_meta = tokio::task::spawn_blocking(move || probe_image_metadata(&meta_path))
        .await
        .ok()
        .and_then(|probed| match probed {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = %file_path.display(), %e, "image metadata probe failed");
                None
            }
        })
        .unwrap_or_else(ImageMeta::default);

    let record = HistoryRecord {
        id: Uuid::new_v4().to_string(),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        local_file_name: file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path: Some(file_path.to_string_lossy().into_owned()),
        primary_backend: outcome.primary_backend,
        results: outcome.attempts.clone(),
        generated_link: outcome.primary_url.clone(),
        image_meta,
        link_check_status: None,
    };
    store.insert(&record)?;
    Ok((record, outcome))
}
