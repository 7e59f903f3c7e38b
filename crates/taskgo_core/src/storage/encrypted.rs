//! Encrypted snapshot adapter over a raw key-value backend.
//!
//! # Responsibility
//! - Serialize a `TaskCollection` to JSON, encrypt it and store it as one blob.
//! - Reverse the process on load, reporting corruption as an error.
//!
//! # Invariants
//! - Plaintext task data never reaches the backend.
//! - Logs carry key, operation, context and size only.

use crate::model::collection::TaskCollection;
use crate::model::mutation::MutationKind;
use crate::storage::cipher::TaskCipher;
use crate::storage::{ensure_valid_key, KeyValueStore, SnapshotStore, StorageError, StorageResult};
use async_trait::async_trait;
use log::{debug, error, info};
use std::time::Instant;

/// Snapshot store that encrypts whole collections before handing them to `S`.
#[derive(Debug)]
pub struct EncryptedStorage<S> {
    backend: S,
    cipher: TaskCipher,
}

impl<S: KeyValueStore> EncryptedStorage<S> {
    pub fn new(backend: S, cipher: TaskCipher) -> Self {
        Self { backend, cipher }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Serializes and encrypts `payload` bound to `key`.
    pub fn seal(&self, key: &str, payload: &TaskCollection) -> StorageResult<String> {
        let json = serde_json::to_vec(payload)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.cipher.encrypt(&json, key.as_bytes())
    }

    /// Decrypts and deserializes a blob previously sealed under `key`.
    pub fn open(&self, key: &str, blob: &str) -> StorageResult<TaskCollection> {
        let json = self.cipher.decrypt(blob, key.as_bytes())?;
        serde_json::from_slice(&json).map_err(|err| StorageError::Serialization(err.to_string()))
    }

    pub async fn get_item(&self, key: &str) -> StorageResult<Option<TaskCollection>> {
        ensure_valid_key(key)?;
        let started_at = Instant::now();

        let blob = match self.backend.get(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("event=storage_get module=storage status=miss key={key}");
                return Ok(None);
            }
            Err(err) => {
                log_failure("storage_get", key, started_at, &err);
                return Err(err);
            }
        };

        match self.open(key, &blob) {
            Ok(collection) => {
                info!(
                    "event=storage_get module=storage status=ok key={} tasks={} duration_ms={}",
                    key,
                    collection.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(Some(collection))
            }
            Err(err) => {
                log_failure("storage_get", key, started_at, &err);
                Err(err)
            }
        }
    }

    pub async fn set_item(
        &self,
        key: &str,
        payload: &TaskCollection,
        operation: MutationKind,
        context: &str,
    ) -> StorageResult<()> {
        ensure_valid_key(key)?;
        let started_at = Instant::now();

        let result = match self.seal(key, payload) {
            Ok(blob) => {
                let bytes = blob.len();
                self.backend.set(key, blob).await.map(|()| bytes)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(bytes) => {
                info!(
                    "event=storage_set module=storage status=ok key={} operation={} context={} tasks={} bytes={} duration_ms={}",
                    key,
                    operation,
                    context,
                    payload.len(),
                    bytes,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=storage_set module=storage status=error key={} operation={} context={} duration_ms={} error_code={} error={}",
                    key,
                    operation,
                    context,
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                Err(err)
            }
        }
    }

    pub async fn remove_item(&self, key: &str) -> StorageResult<()> {
        ensure_valid_key(key)?;
        let started_at = Instant::now();
        match self.backend.remove(key).await {
            Ok(()) => {
                info!("event=storage_remove module=storage status=ok key={key}");
                Ok(())
            }
            Err(err) => {
                log_failure("storage_remove", key, started_at, &err);
                Err(err)
            }
        }
    }
}

fn log_failure(event: &str, key: &str, started_at: Instant, err: &StorageError) {
    error!(
        "event={} module=storage status=error key={} duration_ms={} error_code={} error={}",
        event,
        key,
        started_at.elapsed().as_millis(),
        err.code(),
        err
    );
}

#[async_trait]
impl<S: KeyValueStore> SnapshotStore for EncryptedStorage<S> {
    async fn get_item(&self, key: &str) -> StorageResult<Option<TaskCollection>> {
        EncryptedStorage::get_item(self, key).await
    }

    async fn set_item(
        &self,
        key: &str,
        payload: &TaskCollection,
        operation: MutationKind,
        context: &str,
    ) -> StorageResult<()> {
        EncryptedStorage::set_item(self, key, payload, operation, context).await
    }
}
