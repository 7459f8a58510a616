//! Encryption at rest (spec §4.6 "Encryption at rest").
//!
//! Encrypts byte payloads before `put` and decrypts after `get` using
//! AES-256-GCM with a per-object nonce. The master key is loaded from a
//! restricted file (mode 0600 on Unix); rotation re-encrypts on next
//! write rather than eagerly rewriting every object.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::AppError;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// AES-256-GCM encryptor/decryptor bound to a single master key.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    pub fn new(key_bytes: &[u8]) -> Result<Self, AppError> {
        if key_bytes.len() != KEY_LEN {
            return Err(AppError::Internal(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Load (or create, on first run) the master key from `path`. On Unix
    /// the file is created with mode 0600.
    pub fn load_or_create(path: &std::path::Path) -> Result<Self, AppError> {
        if path.exists() {
            let bytes = std::fs::read(path).map_err(|e| AppError::Internal(e.to_string()))?;
            return Self::new(&bytes);
        }
        let mut key = vec![0u8; KEY_LEN];
        let _ = &OsRng;
        rand::thread_rng().fill_bytes(&mut key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Internal(e.to_string()))?;
        }
        std::fs::write(path, &key).map_err(|e| AppError::Internal(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms).map_err(|e| AppError::Internal(e.to_string()))?;
        }
        Self::new(&key)
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::Internal(format!("encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext` blob produced by `encrypt`.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, AppError> {
        if blob.len() < NONCE_LEN {
            return Err(AppError::Integrity("encrypted blob too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::Integrity("decryption failed: key mismatch or corrupt data".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        vec![7u8; KEY_LEN]
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let enc = Encryptor::new(&test_key()).unwrap();
        let blob = enc.encrypt(b"archive bytes").unwrap();
        let plain = enc.decrypt(&blob).unwrap();
        assert_eq!(plain, b"archive bytes");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let enc = Encryptor::new(&test_key()).unwrap();
        let mut blob = enc.encrypt(b"archive bytes").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(enc.decrypt(&blob).is_err());
    }

    #[test]
    fn load_or_create_persists_key_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".encryption_key");
        let enc1 = Encryptor::load_or_create(&path).unwrap();
        let enc2 = Encryptor::load_or_create(&path).unwrap();
        let blob = enc1.encrypt(b"data").unwrap();
        assert_eq!(enc2.decrypt(&blob).unwrap(), b"data");
    }
}
