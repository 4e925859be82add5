//! Encryption Service
//!
//! AES-256-GCM authenticated encryption for memory at rest. The master key
//! comes from the caller (OS key store integration) or is derived from a
//! passphrase with PBKDF2-HMAC-SHA256; the derivation salt persists under
//! the platform user data directory. Encryption and decryption happen at
//! the repository boundary; ciphertext never reaches the stores in a
//! recoverable-without-key form and plaintext never reaches disk.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

pub const KEY_LENGTH: usize = 32;
pub const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
/// OWASP recommendation for PBKDF2-HMAC-SHA256.
pub const PBKDF2_ITERATIONS: u32 = 480_000;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("failed to encrypt data")]
    EncryptFailed,
    /// Decryption failed: the stored record is corrupt or the active key
    /// does not match the one that produced it.
    #[error("failed to decrypt data: corrupt ciphertext or wrong key")]
    CorruptOrWrongKey,
    #[error("master key must be {KEY_LENGTH} bytes")]
    InvalidKeyLength,
    #[error("failed to access salt storage: {0}")]
    SaltStorage(#[from] std::io::Error),
}

/// AES-256-GCM encryption service with a single active key.
///
/// Immutable after construction and freely shareable across tasks.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Build from an existing 32-byte master key (e.g. from a key store).
    pub fn from_master_key(master_key: &[u8]) -> Result<Self, EncryptionError> {
        if master_key.len() != KEY_LENGTH {
            return Err(EncryptionError::InvalidKeyLength);
        }
        let key = Key::<Aes256Gcm>::from_slice(master_key);
        info!("Encryption service initialized from master key");
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build by deriving a key from a passphrase, persisting the salt at
    /// the default platform path.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, EncryptionError> {
        Self::from_passphrase_with_salt_path(passphrase, default_salt_path())
    }

    /// Build by deriving a key from a passphrase with an explicit salt
    /// location.
    pub fn from_passphrase_with_salt_path(
        passphrase: &str,
        salt_path: PathBuf,
    ) -> Result<Self, EncryptionError> {
        let salt = load_or_create_salt(&salt_path)?;
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
        info!("Encryption service initialized from passphrase");
        Self::from_master_key(&key)
    }

    /// Encrypt a UTF-8 string; returns base64url text with the nonce
    /// prepended to the ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let encrypted = self.encrypt_bytes(plaintext.as_bytes())?;
        Ok(URL_SAFE_NO_PAD.encode(encrypted))
    }

    /// Decrypt base64url text produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, EncryptionError> {
        let raw = URL_SAFE_NO_PAD
            .decode(ciphertext)
            .map_err(|_| EncryptionError::CorruptOrWrongKey)?;
        let plaintext = self.decrypt_bytes(&raw)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::CorruptOrWrongKey)
    }

    /// Encrypt arbitrary bytes. Output layout: `nonce || ciphertext+tag`.
    pub fn encrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, data)
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt bytes produced by [`encrypt_bytes`](Self::encrypt_bytes).
    pub fn decrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < NONCE_LENGTH {
            return Err(EncryptionError::CorruptOrWrongKey);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LENGTH);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EncryptionError::CorruptOrWrongKey)
    }

    /// Deterministic hash for equality search over encrypted columns.
    pub fn hash_for_index(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a fresh random master key for key-store storage.
    pub fn generate_master_key() -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }
}

/// Platform salt location: `$XDG_DATA_HOME/slovo/encryption.salt` on Unix,
/// `%APPDATA%\slovo\encryption.salt` on Windows.
fn default_salt_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slovo")
        .join("encryption.salt")
}

fn load_or_create_salt(path: &Path) -> Result<[u8; SALT_LENGTH], EncryptionError> {
    if path.exists() {
        let data = std::fs::read(path)?;
        if data.len() == SALT_LENGTH {
            let mut salt = [0u8; SALT_LENGTH];
            salt.copy_from_slice(&data);
            return Ok(salt);
        }
        warn!("Invalid salt file at {}, regenerating", path.display());
    }

    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, salt)?;
    info!("Created new encryption salt at {}", path.display());
    Ok(salt)
}
