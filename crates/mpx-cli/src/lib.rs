// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library half of the mirrorpix CLI.
//!
//! Command implementations live here so they can be tested without
//! spawning the binary.

#![deny(unsafe_code)]

pub mod commands;
pub mod format;

use std::path::PathBuf;

/// Resolved per-OS data paths.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Directory everything lives under.
    pub root: PathBuf,
    /// Encrypted config file.
    pub config: PathBuf,
    /// Key file standing in for the OS keychain.
    pub key: PathBuf,
    /// History database.
    pub history: PathBuf,
}

impl DataPaths {
    /// Resolve under an explicit root, or the platform data dir.
    pub fn resolve(override_root: Option<PathBuf>) -> Self {
        let root = override_root.unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mirrorpix")
        });
        Self {
            config: root.join("config.dat"),
            key: root.join("secure.key"),
            history: root.join("history.db"),
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_wins() {
        let paths = DataPaths::resolve(Some(PathBuf::from("/tmp/mpx-test")));
        assert_eq!(paths.root, PathBuf::from("/tmp/mpx-test"));
        assert_eq!(paths.config, PathBuf::from("/tmp/mpx-test/config.dat"));
        assert_eq!(paths.history, PathBuf::from("/tmp/mpx-test/history.db"));
    }
}
