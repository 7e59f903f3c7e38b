//! Authenticated encryption for stored snapshots.
//!
//! Blob format: `tg1:` + base64(nonce(12) || ciphertext || tag(16)).
//! The storage key is bound as associated data, so a blob copied to a
//! different key fails to decrypt.

use crate::storage::{StorageError, StorageResult};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Formatter};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const BLOB_PREFIX: &str = "tg1:";

/// AES-256-GCM snapshot cipher.
#[derive(Clone)]
pub struct TaskCipher {
    cipher: Aes256Gcm,
}

impl TaskCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Derives the key as SHA-256(salt || 0x00 || secret).
    pub fn from_secret(secret: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        Self::new(&key)
    }

    /// Encrypts `plaintext` with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> StorageResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| StorageError::Encryption("aes-gcm seal failed".to_string()))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(nonce.as_slice());
        raw.extend_from_slice(&ciphertext);
        Ok(format!("{BLOB_PREFIX}{}", STANDARD.encode(raw)))
    }

    /// Authenticates and decrypts a blob produced by [`TaskCipher::encrypt`].
    pub fn decrypt(&self, blob: &str, aad: &[u8]) -> StorageResult<Vec<u8>> {
        let encoded = blob
            .strip_prefix(BLOB_PREFIX)
            .ok_or_else(|| StorageError::Decryption("unknown blob format".to_string()))?;
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|err| StorageError::Decryption(format!("invalid base64: {err}")))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(StorageError::Decryption(format!(
                "blob too short: {} bytes",
                raw.len()
            )));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| StorageError::Decryption("authentication failed".to_string()))
    }
}

impl Debug for TaskCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskCipher(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskCipher, BLOB_PREFIX};
    use crate::storage::StorageError;

    #[test]
    fn encrypt_uses_fresh_nonce_and_decrypts() {
        let cipher = TaskCipher::new(&[7u8; 32]);
        let first = cipher.encrypt(b"payload", b"k").unwrap();
        let second = cipher.encrypt(b"payload", b"k").unwrap();

        assert!(first.starts_with(BLOB_PREFIX));
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first, b"k").unwrap(), b"payload");
    }

    #[test]
    fn wrong_key_or_aad_fails_authentication() {
        let cipher = TaskCipher::from_secret("secret", "salt");
        let blob = cipher.encrypt(b"payload", b"tasks").unwrap();

        let other = TaskCipher::from_secret("other", "salt");
        assert!(matches!(
            other.decrypt(&blob, b"tasks"),
            Err(StorageError::Decryption(_))
        ));
        assert!(matches!(
            cipher.decrypt(&blob, b"backup"),
            Err(StorageError::Decryption(_))
        ));
    }

    #[test]
    fn malformed_blobs_are_rejected() {
        let cipher = TaskCipher::new(&[1u8; 32]);
        for blob in ["", "plain json", "tg1:!!!", "tg1:AAAA"] {
            assert!(
                matches!(cipher.decrypt(blob, b"k"), Err(StorageError::Decryption(_))),
                "blob `{blob}` should fail"
            );
        }
    }

    #[test]
    fn debug_output_hides_key_material() {
        let cipher = TaskCipher::new(&[9u8; 32]);
        assert_eq!(format!("{cipher:?}"), "TaskCipher(<redacted>)");
    }
}
