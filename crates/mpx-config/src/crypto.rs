// SPDX-License-Identifier: MIT OR Apache-2.0
//! At-rest encryption for the config file.
//!
//! The engine only needs three operations: get-or-create a key, encrypt, and
//! decrypt. The concrete algorithm stays behind [`ConfigCipher`] so the GUI
//! host can swap in its keychain-bound implementation.

use crate::ConfigError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use std::path::PathBuf;

/// AES-256-GCM key length in bytes.
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Symmetric cipher used for the config file.
pub trait ConfigCipher: Send + Sync {
    /// Encrypt `plaintext` under `key`.
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, ConfigError>;
    /// Decrypt `data` under `key`.
    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>, ConfigError>;
}

/// AES-256-GCM with a random 96-bit nonce prepended to the ciphertext.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl ConfigCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, ConfigError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| ConfigError::Crypto(format!("key must be {KEY_LEN} bytes")))?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ConfigError::Crypto("encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>, ConfigError> {
        if data.len() < NONCE_LEN {
            return Err(ConfigError::Crypto("ciphertext too short".into()));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| ConfigError::Crypto(format!("key must be {KEY_LEN} bytes")))?;
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ConfigError::Crypto("decryption failed".into()))
    }
}

/// Identity cipher for tests and debugging builds.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCipher;

impl ConfigCipher for PlainCipher {
    fn encrypt(&self, plaintext: &[u8], _key: &[u8]) -> Result<Vec<u8>, ConfigError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, data: &[u8], _key: &[u8]) -> Result<Vec<u8>, ConfigError> {
        Ok(data.to_vec())
    }
}

/// Source of the symmetric key.
pub trait KeyProvider: Send + Sync {
    /// Return the key, creating and persisting it on first use.
    fn get_or_create_key(&self) -> Result<Vec<u8>, ConfigError>;
}

/// Key provider backed by a base64 file next to the config.
///
/// Stands in for the OS-keychain provider the GUI host supplies; the file is
/// created user-readable only.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    /// Create a provider storing its key at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyProvider for FileKeyProvider {
    fn get_or_create_key(&self) -> Result<Vec<u8>, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let key = BASE64
                    .decode(text.trim())
                    .map_err(|e| ConfigError::Crypto(format!("stored key is not base64: {e}")))?;
                if key.len() != KEY_LEN {
                    return Err(ConfigError::Crypto(format!(
                        "stored key has wrong length {}",
                        key.len()
                    )));
                }
                Ok(key)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut key = vec![0u8; KEY_LEN];
                OsRng.fill_bytes(&mut key);
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| ConfigError::io("create dir", parent, e))?;
                }
                std::fs::write(&self.path, BASE64.encode(&key))
                    .map_err(|e| ConfigError::io("write key", &self.path, e))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o600);
                    std::fs::set_permissions(&self.path, perms)
                        .map_err(|e| ConfigError::io("chmod key", &self.path, e))?;
                }
                Ok(key)
            }
            Err(e) => Err(ConfigError::io("read key", &self.path, e)),
        }
    }
}
