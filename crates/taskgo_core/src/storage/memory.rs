//! In-process key-value backend with an optional byte quota.

use crate::storage::{ensure_valid_key, KeyValueStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Map-backed store mirroring browser storage semantics.
///
/// With a quota set, a write whose resulting total size (keys plus values, in
/// bytes) would exceed the quota fails with `QuotaExceeded` and leaves the
/// previous value in place.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Returns the raw stored value without going through the async API.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Stores a raw value, bypassing quota checks.
    pub fn put_raw(&self, key: &str, value: impl Into<String>) {
        self.lock().insert(key.to_string(), value.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        ensure_valid_key(key)?;
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        ensure_valid_key(key)?;
        let mut entries = self.lock();

        if let Some(quota_bytes) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let required_bytes = others + key.len() + value.len();
            if required_bytes > quota_bytes {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    required_bytes,
                    quota_bytes,
                });
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        ensure_valid_key(key)?;
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::storage::{KeyValueStore, StorageError};

    #[tokio::test]
    async fn set_get_remove_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1".to_string()).await.unwrap();
        store.set("k", "v2".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(store.len(), 1);

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn quota_rejects_oversized_write_and_keeps_previous_value() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "12345".to_string()).await.unwrap();

        let err = store.set("k", "1234567890".to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                required_bytes: 11,
                quota_bytes: 10,
                ..
            }
        ));
        assert_eq!(store.peek("k").as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn rejects_invalid_keys() {
        let store = MemoryStore::new();
        let err = store.set("../x", "v".to_string()).await.unwrap_err();
        assert_eq!(err, StorageError::InvalidKey("../x".to_string()));
    }
}
