// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative cancellation shared between the dispatcher and backend tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation handle.
///
/// Cancelling is sticky and fans out to every clone. Backend tasks either
/// poll [`is_cancelled`](Self::is_cancelled) between steps or race their
/// I/O against [`cancelled`](Self::cancelled).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; wakes every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Shortcut for the guard backends run between steps.
    pub fn check(&self) -> Result<(), mpx_error::UploadError> {
        if self.is_cancelled() {
            Err(mpx_error::UploadError::Cancelled)
        } else {
            Ok(())
        }
    }
}
