//! Filesystem-backed object store: `<root>/<bucket>/<key>`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{ObjectStore, StorageError};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `bucket/key` under the root. Only plain relative components
    /// are accepted.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let rel = Path::new(part);
            if part.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
                return Err(StorageError::InvalidKey(format!("{bucket}/{key}")));
            }
            path.push(rel);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(bucket, key)),
            Err(e) => Err(StorageError::Backend(format!("read {}: {e}", path.display()))),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Backend(format!("mkdir {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| StorageError::Backend(format!("write {}: {e}", path.display())))?;

        debug!(bucket, key, bytes = data.len(), content_type, "stored object");
        Ok(())
    }
}
