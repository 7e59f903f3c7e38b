//! Directory-backed key-value store.
//!
//! # Invariants
//! - One file per key: `<dir>/<key>.blob`.
//! - Writes go to a unique temp file and are renamed into place, so readers
//!   see either the old or the new blob, never a torn one.

use crate::storage::{ensure_valid_key, KeyValueStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const BLOB_EXTENSION: &str = "blob";

/// File-per-key store for desktop/server hosts of the pipeline.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BLOB_EXTENSION}"))
    }
}

fn io_error(key: &str, err: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        ensure_valid_key(key)?;
        match tokio::fs::read_to_string(self.blob_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(key, err)),
        }
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        ensure_valid_key(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| io_error(key, err))?;

        let target = self.blob_path(key);
        let temp = self
            .dir
            .join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));

        if let Err(err) = tokio::fs::write(&temp, value.as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error(key, err));
        }
        if let Err(err) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error(key, err));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        ensure_valid_key(key)?;
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(key, err)),
        }
    }
}
