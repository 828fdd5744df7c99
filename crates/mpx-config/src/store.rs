// SPDX-License-Identifier: MIT OR Apache-2.0
//! Encrypted, single-writer config persistence.
//!
//! All saves flow through one writer task so two concurrent updates can
//! never produce a torn file; the on-disk swap is write-temp + rename.

use crate::{ConfigCipher, ConfigError, KeyProvider, UserConfig, migrate_to_current};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};

enum SaveJob {
    Write(Vec<u8>),
    Flush(oneshot::Sender<()>),
}

/// Owner of the session's [`UserConfig`].
///
/// Readers get snapshots; mutations go through [`update`](Self::update) and
/// are persisted by the single writer task.
pub struct ConfigStore {
    path: PathBuf,
    key: Vec<u8>,
    cipher: Arc<dyn ConfigCipher>,
    current: RwLock<UserConfig>,
    save_tx: mpsc::UnboundedSender<SaveJob>,
}

impl ConfigStore {
    /// Open (or initialise) the config at `path`.
    ///
    /// A file that fails to decrypt or parse is backed up as
    /// `<name>.corrupt.<unix-ms>` and replaced by the default config, so
    /// startup always succeeds unless the filesystem itself fails.
    pub async fn open(
        path: impl Into<PathBuf>,
        cipher: Arc<dyn ConfigCipher>,
        keys: &dyn KeyProvider,
    ) -> Result<Arc<Self>, ConfigError> {
        let path = path.into();
        let key = keys.get_or_create_key()?;

        let loaded = match load_config(&path, cipher.as_ref(), &key)? {
            LoadOutcome::Loaded(cfg) => cfg,
            LoadOutcome::Missing => UserConfig::default(),
            LoadOutcome::Corrupt(backup) => {
                warn!(backup = %backup.display(), "config was unreadable, starting from defaults");
                UserConfig::default()
            }
        };

        let (save_tx, save_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            path: path.clone(),
            key,
            cipher,
            current: RwLock::new(loaded),
            save_tx,
        });
        tokio::spawn(writer_task(path, save_rx));

        // Persist immediately so migrations and corrupt-recovery become
        // durable before the first user-driven update.
        store.persist_current().await?;
        store.flush().await?;
        Ok(store)
    }

    /// A point-in-time copy of the config.
    pub async fn snapshot(&self) -> UserConfig {
        self.current.read().await.clone()
    }

    /// Apply a mutation, check invariants, and enqueue a save.
    ///
    /// The mutation is rolled back if it breaks the aggregate invariant.
    pub async fn update<F>(&self, mutate: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut UserConfig),
    {
        let mut guard = self.current.write().await;
        let mut candidate = guard.clone();
        mutate(&mut candidate);
        candidate.check_invariants()?;
        *guard = candidate;
        let bytes = self.seal(&guard)?;
        drop(guard);
        self.save_tx
            .send(SaveJob::Write(bytes))
            .map_err(|_| ConfigError::WriterGone)
    }

    /// Wait until every enqueued save has reached the disk.
    pub async fn flush(&self) -> Result<(), ConfigError> {
        let (tx, rx) = oneshot::channel();
        self.save_tx
            .send(SaveJob::Flush(tx))
            .map_err(|_| ConfigError::WriterGone)?;
        rx.await.map_err(|_| ConfigError::WriterGone)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist_current(&self) -> Result<(), ConfigError> {
        let guard = self.current.read().await;
        let bytes = self.seal(&guard)?;
        drop(guard);
        self.save_tx
            .send(SaveJob::Write(bytes))
            .map_err(|_| ConfigError::WriterGone)
    }

    fn seal(&self, config: &UserConfig) -> Result<Vec<u8>, ConfigError> {
        let json = serde_json::to_vec(config)?;
        self.cipher.encrypt(&json, &self.key)
    }
}

enum LoadOutcome {
    Loaded(UserConfig),
    Missing,
    Corrupt(PathBuf),
}

fn load_config(
    path: &Path,
    cipher: &dyn ConfigCipher,
    key: &[u8],
) -> Result<LoadOutcome, ConfigError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
        Err(e) => return Err(ConfigError::io("read", path, e)),
    };

    let parsed = cipher
        .decrypt(&raw, key)
        .and_then(|json| serde_json::from_slice::<serde_json::Value>(&json).map_err(Into::into))
        .and_then(migrate_to_current)
        .and_then(|(value, from)| {
            let cfg: UserConfig = serde_json::from_value(value)?;
            Ok((cfg, from))
        });

    match parsed {
        Ok((cfg, from)) => {
            if from < crate::CURRENT_CONFIG_VERSION {
                info!(from, to = crate::CURRENT_CONFIG_VERSION, "migrated config");
            }
            Ok(LoadOutcome::Loaded(cfg))
        }
        Err(err) => {
            warn!(%err, "config file unreadable");
            let backup = corrupt_backup_path(path);
            std::fs::rename(path, &backup).map_err(|e| ConfigError::io("backup", path, e))?;
            Ok(LoadOutcome::Corrupt(backup))
        }
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let ts = chrono::Utc::now().timestamp_millis();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.dat".into());
    path.with_file_name(format!("{name}.corrupt.{ts}"))
}

async fn writer_task(path: PathBuf, mut rx: mpsc::UnboundedReceiver<SaveJob>) {
    while let Some(job) = rx.recv().await {
        match job {
            SaveJob::Write(bytes) => {
                if let Err(err) = atomic_write(&path, &bytes).await {
                    warn!(%err, "config save failed");
                }
            }
            SaveJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ConfigError::io("create dir", parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| ConfigError::io("write", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ConfigError::io("rename", path, e))?;
    Ok(())
}
