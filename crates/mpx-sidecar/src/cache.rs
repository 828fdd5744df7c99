// SPDX-License-Identifier: MIT OR Apache-2.0
//! TTL cache for sidecar-acquired tokens.

use mpx_core::BackendId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tokens are considered stale this long before their actual expiry, so an
/// upload never starts with a token about to die mid-flight.
const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Per-backend token cache with early expiry.
#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<BackendId, CachedToken>>,
}

impl TokenCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A still-fresh token for `id`, if any.
    pub fn get(&self, id: BackendId) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(&id)?;
        if entry.expires_at.checked_duration_since(Instant::now())? > EXPIRY_MARGIN {
            Some(entry.token.clone())
        } else {
            None
        }
    }

    /// Store a token valid for `ttl`.
    pub fn put(&self, id: BackendId, token: impl Into<String>, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                id,
                CachedToken {
                    token: token.into(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// Drop a token the backend just rejected.
    pub fn evict(&self, id: BackendId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tokens_are_returned() {
        let cache = TokenCache::new();
        cache.put(BackendId::Qiyu, "tok", Duration::from_secs(300));
        assert_eq!(cache.get(BackendId::Qiyu).as_deref(), Some("tok"));
        assert_eq!(cache.get(BackendId::Nami), None);
    }

    #[test]
    fn nearly_expired_tokens_are_not_returned() {
        let cache = TokenCache::new();
        cache.put(BackendId::Qiyu, "tok", Duration::from_secs(5));
        // Within the 10 s early-expiry margin from the start.
        assert_eq!(cache.get(BackendId::Qiyu), None);
    }

    #[test]
    fn eviction_removes_the_entry() {
        let cache = TokenCache::new();
        cache.put(BackendId::Nami, "tok", Duration::from_secs(300));
        cache.evict(BackendId::Nami);
        assert_eq!(cache.get(BackendId::Nami), None);
    }

    #[test]
    fn put_replaces_previous_token() {
        let cache = TokenCache::new();
        cache.put(BackendId::Qiyu, "old", Duration::from_secs(300));
        cache.put(BackendId::Qiyu, "new", Duration::from_secs(300));
        assert_eq!(cache.get(BackendId::Qiyu).as_deref(), Some("new"));
    }
}
