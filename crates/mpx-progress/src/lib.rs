// SPDX-License-Identifier: MIT OR Apache-2.0
//! Progress plumbing between backend uploaders and the session.
//!
//! Each dispatch owns exactly one channel; every backend task writes into it
//! through a [`ProgressSink`] tagged with that invocation's `upload_id`.
//! There is no global bus. The [`TransferReporter`] enforces the emission
//! contract: one event at file open, one at least every 256 KiB or 10 % of
//! the file (whichever is smaller), and exactly one at 100 % on success.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use mpx_core::{BackendId, Progress, ProgressUpdate, UploadStage};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Emission threshold in bytes: 256 KiB.
pub const EMIT_EVERY_BYTES: u64 = 256 * 1024;

/// Create the progress channel for one dispatch.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, ProgressReceiver { rx })
}

/// Sending half of a dispatch's progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSender {
    /// Derive a sink for one backend-upload invocation.
    pub fn sink(&self, upload_id: Uuid, backend_id: BackendId) -> ProgressSink {
        ProgressSink {
            upload_id,
            backend_id,
            tx: Some(self.tx.clone()),
        }
    }
}

/// Receiving half of a dispatch's progress channel.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::UnboundedReceiver<ProgressUpdate>,
}

impl ProgressReceiver {
    /// Receive the next update, waiting asynchronously.
    ///
    /// Returns `None` once every sender is gone and the channel is drained.
    pub async fn recv(&mut self) -> Option<ProgressUpdate> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressUpdate> {
        self.rx.try_recv().ok()
    }
}

/// Write handle for one backend-upload invocation.
///
/// A disabled sink swallows events, so library code can emit
/// unconditionally.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    upload_id: Uuid,
    backend_id: BackendId,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressSink {
    /// A sink that drops everything; for tests and fire-and-forget callers.
    pub fn disabled(backend_id: BackendId) -> Self {
        Self {
            upload_id: Uuid::new_v4(),
            backend_id,
            tx: None,
        }
    }

    /// The invocation id this sink is tagged with.
    pub fn upload_id(&self) -> Uuid {
        self.upload_id
    }

    /// The backend this sink reports for.
    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    /// Emit a raw progress event.
    pub fn emit(&self, uploaded_bytes: u64, total_bytes: u64, stage: Option<UploadStage>) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching any more.
            let _ = tx.send(ProgressUpdate {
                upload_id: self.upload_id,
                backend_id: self.backend_id,
                progress: Progress {
                    uploaded_bytes,
                    total_bytes,
                },
                stage,
            });
        }
    }
}

/// Enforces the emission contract for a single transfer.
#[derive(Debug)]
pub struct TransferReporter {
    sink: ProgressSink,
    total: u64,
    sent: u64,
    last_emitted: u64,
    finished: bool,
}

impl TransferReporter {
    /// Start a transfer of `total` bytes, emitting the mandatory open event.
    pub fn start(sink: ProgressSink, total: u64) -> Self {
        sink.emit(0, total, Some(UploadStage::Preparing));
        Self {
            sink,
            total,
            sent: 0,
            last_emitted: 0,
            finished: false,
        }
    }

    fn threshold(&self) -> u64 {
        // Every 256 KiB, or every 10 % for small files.
        EMIT_EVERY_BYTES.min((self.total / 10).max(1))
    }

    /// Account for `n` more bytes on the wire, emitting when due.
    ///
    /// The 100 % event is reserved for [`finish`](Self::finish); interim
    /// events are capped just below the total.
    pub fn record(&mut self, n: u64) {
        if self.finished {
            return;
        }
        self.sent = self.sent.saturating_add(n);
        let capped = self.sent.min(self.total.saturating_sub(1));
        if capped > self.last_emitted && capped - self.last_emitted >= self.threshold() {
            self.last_emitted = capped;
            self.sink
                .emit(capped, self.total, Some(UploadStage::Transferring));
        }
    }

    /// Emit the single 100 % event. Idempotent.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.sink
            .emit(self.total, self.total, Some(UploadStage::Finalizing));
    }

    /// Bytes recorded so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

/// Per-`upload_id` monotonicity filter for consumers.
///
/// Progress events for a given invocation are monotonic non-decreasing in
/// `uploaded_bytes`; anything else must be dropped by the consumer.
#[derive(Debug, Default)]
pub struct MonotonicGate {
    high_water: HashMap<Uuid, u64>,
}

impl MonotonicGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the update advances (or matches) the stream's high-water
    /// mark; regressions return `false` and are recorded nowhere.
    pub fn accept(&mut self, update: &ProgressUpdate) -> bool {
        let mark = self.high_water.entry(update.upload_id).or_insert(0);
        if update.progress.uploaded_bytes < *mark {
            return false;
        }
        *mark = update.progress.uploaded_bytes;
        true
    }

    /// Highest accepted byte count for an invocation.
    pub fn high_water(&self, upload_id: Uuid) -> u64 {
        self.high_water.get(&upload_id).copied().unwrap_or(0)
    }
}
