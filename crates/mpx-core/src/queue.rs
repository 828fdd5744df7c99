// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory session queue mirroring what the UI shows while uploads run.
//!
//! Queue state is ephemeral: it lives for the duration of a session and is
//! rebuilt from history on restart. Progress updates arrive keyed by
//! `upload_id`; the queue owns the reverse map back to `(item, backend)`.

use crate::{BackendId, ProgressUpdate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Status of one backend slot within a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Not started yet.
    Pending,
    /// Transfer in progress.
    Uploading,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failed,
}

/// Per-backend display state of a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSlot {
    /// Current status.
    pub status: SlotStatus,
    /// Human-readable status line.
    pub status_text: String,
    /// Percent complete, 0–100.
    pub percent: u8,
    /// Final URL once the backend succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Last error message when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `true` while a targeted retry is running for this slot.
    pub is_retrying: bool,
    /// Step index for multi-step backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u8>,
    /// Step count for multi-step backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u8>,
}

impl Default for BackendSlot {
    fn default() -> Self {
        Self {
            status: SlotStatus::Pending,
            status_text: "waiting".into(),
            percent: 0,
            link: None,
            error: None,
            is_retrying: false,
            step_index: None,
            total_steps: None,
        }
    }
}

/// Overall status of a queue item across all its backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Nothing dispatched yet.
    Pending,
    /// At least one backend is transferring.
    Uploading,
    /// At least one backend succeeded and none are still running.
    Success,
    /// Every backend failed.
    Failed,
}

/// One file the session is uploading or has uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue-item id (matches the eventual history-record id).
    pub id: String,
    /// Absolute path of the file being uploaded.
    pub file_path: String,
    /// Display file name.
    pub file_name: String,
    /// Backends this item was dispatched to, in dispatch order.
    pub enabled_backends: Vec<BackendId>,
    /// Per-backend display state.
    pub per_backend: HashMap<BackendId, BackendSlot>,
    /// Aggregate status.
    pub overall_status: OverallStatus,
    /// URL of the elected primary backend once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_url: Option<String>,
    /// Thumbnail URL for the queue UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
    /// Completed full-retry count.
    pub retry_count: u32,
    /// Full-retry ceiling.
    pub max_retries: u32,
    /// When the last retry ran, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_ms: Option<i64>,
}

impl QueueItem {
    /// Create a pending item for the given file and backend set.
    pub fn new(
        id: impl Into<String>,
        file_path: impl Into<String>,
        file_name: impl Into<String>,
        enabled_backends: Vec<BackendId>,
    ) -> Self {
        let per_backend = enabled_backends
            .iter()
            .map(|&b| (b, BackendSlot::default()))
            .collect();
        Self {
            id: id.into(),
            file_path: file_path.into(),
            file_name: file_name.into(),
            enabled_backends,
            per_backend,
            overall_status: OverallStatus::Pending,
            primary_url: None,
            thumb_url: None,
            retry_count: 0,
            max_retries: 3,
            last_retry_ms: None,
        }
    }

    /// Recompute `overall_status` from the per-backend slots.
    pub fn recompute_overall(&mut self) {
        let slots: Vec<&BackendSlot> = self.per_backend.values().collect();
        if slots.is_empty() || slots.iter().all(|s| s.status == SlotStatus::Pending) {
            self.overall_status = OverallStatus::Pending;
        } else if slots.iter().any(|s| s.status == SlotStatus::Uploading) {
            self.overall_status = OverallStatus::Uploading;
        } else if slots.iter().any(|s| s.status == SlotStatus::Success) {
            self.overall_status = OverallStatus::Success;
        } else {
            self.overall_status = OverallStatus::Failed;
        }
    }
}

/// Session-owned queue of [`QueueItem`]s plus the `upload_id` reverse map.
///
/// The queue is the consumer side of the progress channel: it drops
/// out-of-order updates so each slot's percent is monotonic.
#[derive(Debug, Default)]
pub struct SessionQueue {
    items: HashMap<String, QueueItem>,
    order: Vec<String>,
    by_upload: HashMap<Uuid, (String, BackendId)>,
    high_water: HashMap<Uuid, u64>,
}

impl SessionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item and return a handle to register upload ids against it.
    pub fn push(&mut self, item: QueueItem) {
        self.order.push(item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    /// Register a backend-upload invocation against an item.
    pub fn register_upload(&mut self, upload_id: Uuid, item_id: &str, backend_id: BackendId) {
        self.by_upload
            .insert(upload_id, (item_id.to_string(), backend_id));
    }

    /// Apply a progress update.
    ///
    /// Updates whose byte count regresses below the high-water mark for the
    /// same `upload_id` are dropped. Returns `true` when the update was
    /// applied.
    pub fn apply(&mut self, update: &ProgressUpdate) -> bool {
        let Some((item_id, backend_id)) = self.by_upload.get(&update.upload_id).cloned() else {
            return false;
        };
        let mark = self.high_water.entry(update.upload_id).or_insert(0);
        if update.progress.uploaded_bytes < *mark {
            return false;
        }
        *mark = update.progress.uploaded_bytes;

        let Some(item) = self.items.get_mut(&item_id) else {
            return false;
        };
        let slot = item.per_backend.entry(backend_id).or_default();
        slot.percent = update.progress.percent();
        slot.status = if update.progress.is_complete() {
            SlotStatus::Success
        } else {
            SlotStatus::Uploading
        };
        slot.status_text = format!("{}%", slot.percent);
        item.recompute_overall();
        true
    }

    /// Highest progress fraction observed for an upload id, 0.0–1.0.
    pub fn high_water_fraction(&self, upload_id: Uuid, total_bytes: u64) -> f64 {
        if total_bytes == 0 {
            return 0.0;
        }
        self.high_water
            .get(&upload_id)
            .map(|&b| b as f64 / total_bytes as f64)
            .unwrap_or(0.0)
    }

    /// Look up an item by id.
    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.items.get(id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut QueueItem> {
        self.items.get_mut(id)
    }

    /// Items in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// Drop an item and its upload-id registrations.
    pub fn remove(&mut self, id: &str) -> Option<QueueItem> {
        self.order.retain(|i| i != id);
        self.by_upload.retain(|_, (item, _)| item != id);
        self.items.remove(id)
    }

    /// Number of items in the queue.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` when the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
