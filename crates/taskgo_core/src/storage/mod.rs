//! Storage contracts and encrypted snapshot persistence.
//!
//! # Responsibility
//! - Define the key-value backend contract standing in for browser storage.
//! - Define the snapshot store contract used by the auto-save scheduler.
//! - Keep encryption/serialization details inside the storage boundary.
//!
//! # Invariants
//! - A snapshot is written as one blob under one key, never partially.
//! - Every failure is reported as `StorageError`; nothing is dropped silently.

use crate::model::collection::TaskCollection;
use crate::model::mutation::MutationKind;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod cipher;
pub mod encrypted;
pub mod file;
pub mod memory;

pub type StorageResult<T> = Result<T, StorageError>;

const MAX_STORAGE_KEY_LEN: usize = 128;

/// Storage adapter failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    InvalidKey(String),
    QuotaExceeded {
        key: String,
        required_bytes: usize,
        quota_bytes: usize,
    },
    Io {
        key: String,
        message: String,
    },
    Serialization(String),
    Encryption(String),
    /// Corrupt, truncated or foreign ciphertext.
    Decryption(String),
}

impl StorageError {
    /// Stable code used in logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "invalid_key",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Io { .. } => "io_failed",
            Self::Serialization(_) => "serialization_failed",
            Self::Encryption(_) => "encryption_failed",
            Self::Decryption(_) => "decryption_failed",
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid storage key: `{key}`"),
            Self::QuotaExceeded {
                key,
                required_bytes,
                quota_bytes,
            } => write!(
                f,
                "storage quota exceeded writing `{key}`: {required_bytes} bytes > {quota_bytes}"
            ),
            Self::Io { key, message } => write!(f, "storage io failed for `{key}`: {message}"),
            Self::Serialization(message) => write!(f, "snapshot serialization failed: {message}"),
            Self::Encryption(message) => write!(f, "snapshot encryption failed: {message}"),
            Self::Decryption(message) => write!(f, "snapshot decryption failed: {message}"),
        }
    }
}

impl Error for StorageError {}

/// Raw string key-value backend (browser `localStorage` semantics).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns `Ok(None)` for a missing key.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    /// Replaces the whole value stored under `key`.
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key).await
    }
}

/// Whole-collection snapshot persistence used by the scheduler.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the snapshot under `key`; `Ok(None)` when nothing is stored.
    async fn get_item(&self, key: &str) -> StorageResult<Option<TaskCollection>>;

    /// Persists `payload` under `key`.
    ///
    /// `operation` and `context` are audit metadata and are not interpreted.
    async fn set_item(
        &self,
        key: &str,
        payload: &TaskCollection,
        operation: MutationKind,
        context: &str,
    ) -> StorageResult<()>;
}

/// Returns whether `key` is usable by every backend, including file-backed.
///
/// Rules: 1..=128 chars from `[A-Za-z0-9_.-]`, not starting with `.`.
pub fn is_valid_storage_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_STORAGE_KEY_LEN
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

pub(crate) fn ensure_valid_key(key: &str) -> StorageResult<()> {
    if is_valid_storage_key(key) {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
