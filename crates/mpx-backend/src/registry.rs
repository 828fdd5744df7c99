// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide backend registry.
//!
//! Registration happens once at startup from a compile-time list; lookup
//! builds a fresh backend instance closed over the given config snapshot.
//! There is no dynamic plugin loading.

use crate::Backend;
use mpx_config::UserConfig;
use mpx_core::BackendId;
use mpx_error::UploadError;
use std::collections::HashMap;

/// Builds one backend instance from a config snapshot.
pub type BackendConstructor =
    Box<dyn Fn(&UserConfig) -> Result<Box<dyn Backend>, UploadError> + Send + Sync>;

/// Map from backend id to constructor.
#[derive(Default)]
pub struct BackendRegistry {
    constructors: HashMap<BackendId, BackendConstructor>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous entry for the id.
    pub fn register<F>(&mut self, id: BackendId, constructor: F)
    where
        F: Fn(&UserConfig) -> Result<Box<dyn Backend>, UploadError> + Send + Sync + 'static,
    {
        self.constructors.insert(id, Box::new(constructor));
    }

    /// Build a fresh instance for `id` from `config`.
    ///
    /// # Errors
    ///
    /// [`UploadError::UnknownBackend`] when no constructor is registered,
    /// or whatever the constructor reports (typically a missing config
    /// entry).
    pub fn create(
        &self,
        id: BackendId,
        config: &UserConfig,
    ) -> Result<Box<dyn Backend>, UploadError> {
        let constructor = self
            .constructors
            .get(&id)
            .ok_or(UploadError::UnknownBackend { backend_id: id })?;
        constructor(config)
    }

    /// Whether `id` has a registered constructor.
    pub fn contains(&self, id: BackendId) -> bool {
        self.constructors.contains_key(&id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<BackendId> {
        let mut ids: Vec<BackendId> = self.constructors.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Probe, UploadRequest, ValidationReport};
    use async_trait::async_trait;
    use mpx_core::UploadResult;

    #[derive(Debug)]
    struct NullBackend(BackendId);

    #[async_trait]
    impl Backend for NullBackend {
        fn id(&self) -> BackendId {
            self.0
        }
        fn validate(&self) -> ValidationReport {
            ValidationReport::ok()
        }
        async fn test_connection(&self) -> Result<Probe, UploadError> {
            Ok(Probe { latency_ms: 0 })
        }
        async fn upload(&self, _req: UploadRequest) -> Result<UploadResult, UploadError> {
            Err(UploadError::Unknown {
                message: "null backend".into(),
            })
        }
        fn public_url(&self, result: &UploadResult) -> String {
            result.url.clone()
        }
    }

    #[test]
    fn create_returns_fresh_instances() {
        let mut registry = BackendRegistry::new();
        registry.register(BackendId::R2, |_cfg| {
            Ok(Box::new(NullBackend(BackendId::R2)) as Box<dyn Backend>)
        });
        let config = UserConfig::default();
        let a = registry.create(BackendId::R2, &config).unwrap();
        let b = registry.create(BackendId::R2, &config).unwrap();
        assert_eq!(a.id(), BackendId::R2);
        assert_eq!(b.id(), BackendId::R2);
    }

    #[test]
    fn unknown_id_fails() {
        let registry = BackendRegistry::new();
        let err = registry
            .create(BackendId::Weibo, &UserConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_BACKEND");
    }

    #[test]
    fn ids_are_sorted() {
        let mut registry = BackendRegistry::new();
        registry.register(BackendId::Weibo, |_| {
            Ok(Box::new(NullBackend(BackendId::Weibo)) as Box<dyn Backend>)
        });
        registry.register(BackendId::R2, |_| {
            Ok(Box::new(NullBackend(BackendId::R2)) as Box<dyn Backend>)
        });
        let ids = registry.ids();
        assert_eq!(ids.len(), 2);
        assert!(registry.contains(BackendId::R2));
        assert!(!registry.contains(BackendId::Smms));
    }
}
