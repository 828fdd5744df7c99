// SPDX-License-Identifier: MIT OR Apache-2.0
//! User configuration for the mirrorpix upload engine.
//!
//! The [`UserConfig`] aggregate is versioned and migrated forward-only, kept
//! encrypted at rest, and mutated exclusively through the single-writer
//! [`ConfigStore`]. Credential-bearing fields never reach a log line except
//! through [`sanitize_config`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod migrate;
mod model;
mod sanitize;
mod store;
mod validate;

pub use crypto::{AesGcmCipher, ConfigCipher, FileKeyProvider, KeyProvider, PlainCipher};
pub use migrate::{CURRENT_CONFIG_VERSION, migrate_to_current};
pub use model::{
    ApiTokenParams, AuthTokenParams, BackendConfig, CdnConfig, CookieParams, GithubParams,
    LinkPrefixConfig, OutputFormat, S3Params, UpyunParams, UserConfig, WebdavProfile,
};
pub use sanitize::sanitize_config;
pub use store::ConfigStore;
pub use validate::is_valid_user_config;

use std::path::PathBuf;

/// Errors from configuration loading, migration, or persistence.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The stored bytes did not decode as JSON after decryption.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Encryption or decryption failed.
    #[error("config crypto failure: {0}")]
    Crypto(String),

    /// A filesystem operation failed.
    #[error("{op} {path:?}: {source}")]
    Io {
        /// Operation that failed.
        op: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Semantic validation failed.
    #[error("invalid config: {reasons:?}")]
    Invalid {
        /// Individual failure messages.
        reasons: Vec<String>,
    },

    /// The file claims a version newer than this build understands.
    #[error("config version {found} is newer than supported version {supported}")]
    VersionTooNew {
        /// Version found in the file.
        found: u32,
        /// Newest version this build can read.
        supported: u32,
    },

    /// The single-writer save queue is gone.
    #[error("config writer task stopped")]
    WriterGone,
}

impl ConfigError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
