// SPDX-License-Identifier: MIT OR Apache-2.0
//! The shared in-flight set.
//!
//! A full retry owns the whole record; a single retry owns one
//! `(record, backend)` pair. A full retry blocks singles for the same
//! record and vice versa.

use mpx_core::BackendId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Key for one in-flight retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RetryKey {
    /// Full-record retry.
    Full(String),
    /// Targeted single-backend retry.
    Single(String, BackendId),
}

impl RetryKey {
    fn record_id(&self) -> &str {
        match self {
            Self::Full(id) | Self::Single(id, _) => id,
        }
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        if self.record_id() != other.record_id() {
            return false;
        }
        match (self, other) {
            // Same record: a full retry conflicts with everything.
            (Self::Full(_), _) | (_, Self::Full(_)) => true,
            (Self::Single(_, a), Self::Single(_, b)) => a == b,
        }
    }
}

/// The process-wide in-flight set.
#[derive(Debug, Default, Clone)]
pub struct InflightSet {
    keys: Arc<Mutex<HashSet<RetryKey>>>,
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct InflightGuard {
    keys: Arc<Mutex<HashSet<RetryKey>>>,
    key: RetryKey,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}

impl InflightSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a key, or report the conflict.
    pub fn try_acquire(&self, key: RetryKey) -> Option<InflightGuard> {
        let mut keys = self.keys.lock().unwrap_or_else(|p| p.into_inner());
        if keys.iter().any(|held| held.conflicts_with(&key)) {
            return None;
        }
        keys.insert(key.clone());
        Some(InflightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    /// Whether anything is in flight for `record_id`.
    pub fn is_record_busy(&self, record_id: &str) -> bool {
        self.keys
            .lock()
            .map(|keys| keys.iter().any(|k| k.record_id() == record_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_single_is_rejected() {
        let set = InflightSet::new();
        let _a = set
            .try_acquire(RetryKey::Single("r".into(), BackendId::Weibo))
            .unwrap();
        assert!(set
            .try_acquire(RetryKey::Single("r".into(), BackendId::Weibo))
            .is_none());
        // A different backend on the same record is fine.
        assert!(set
            .try_acquire(RetryKey::Single("r".into(), BackendId::R2))
            .is_some());
    }

    #[test]
    fn full_blocks_singles_and_vice_versa() {
        let set = InflightSet::new();
        let guard = set.try_acquire(RetryKey::Full("r".into())).unwrap();
        assert!(set
            .try_acquire(RetryKey::Single("r".into(), BackendId::Weibo))
            .is_none());
        assert!(set.try_acquire(RetryKey::Full("r".into())).is_none());
        drop(guard);

        let _single = set
            .try_acquire(RetryKey::Single("r".into(), BackendId::Weibo))
            .unwrap();
        assert!(set.try_acquire(RetryKey::Full("r".into())).is_none());
    }

    #[test]
    fn different_records_never_conflict() {
        let set = InflightSet::new();
        let _a = set.try_acquire(RetryKey::Full("r1".into())).unwrap();
        assert!(set.try_acquire(RetryKey::Full("r2".into())).is_some());
        assert!(set.is_record_busy("r1"));
        assert!(!set.is_record_busy("r3"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let set = InflightSet::new();
        {
            let _guard = set.try_acquire(RetryKey::Full("r".into())).unwrap();
            assert!(set.is_record_busy("r"));
        }
        assert!(!set.is_record_busy("r"));
    }
}
