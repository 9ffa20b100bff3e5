//! Filesystem-backed [`BlobStore`] (§4.1, §6 "Blob object layout").
//!
//! Stands in for an S3-shaped object store in local development: `key`
//! (already shaped `raw/YYYY-MM-DD/<event_id>.json` by the payload router)
//! becomes a relative path under a root directory, mirroring how
//! `toka-store-sqlite::SqliteBackend::open` takes a root path and creates
//! what it needs beneath it.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::traits::{BlobError, BlobStore};

/// A [`BlobStore`] backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Use `root` as the store's base directory. Does not create it eagerly;
    /// `put` creates parent directories as needed.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Joins `key` onto `root`, refusing any key that would escape it.
    ///
    /// `fluxa_types::Event::validate` already rejects `event_id`s containing
    /// path separators or `..`, so a key derived from a validated event
    /// never reaches the rejection branch here; this is a second,
    /// independent check against a queue message that bypassed that
    /// validation (the queue is not a trusted boundary).
    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_))
        });
        if escapes {
            return Err(BlobError::NotFound(format!(
                "refusing blob key that escapes the store root: {key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Transient(format!("create dir for {key}: {e}")))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| BlobError::Transient(format!("write {key}: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Transient(format!("read {key}: {e}"))),
        }
    }
}
