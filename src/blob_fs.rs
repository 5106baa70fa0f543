//! Filesystem [`BlobStore`].
//!
//! Blobs live flat under `storage.blob_dir`, one file per blob, named by
//! the first 32 hex chars of the SHA-256 of their bytes. Uploading the
//! same bytes twice is a no-op that returns the same id.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use study_planner_core::cache::content_hash;
use study_planner_core::store::{BlobStore, StoredBlob};

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create blob directory: {}", root.display()))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("Failed to resolve blob directory: {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid blob id: {}", id);
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<StoredBlob> {
        let mut id = content_hash(&bytes);
        id.truncate(32);
        let path = self.path_for(&id)?;
        let byte_size = bytes.len() as u64;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(blob = %id, name, "blob already stored");
        } else {
            let tmp = self.root.join(format!("{}.tmp", id));
            tokio::fs::write(&tmp, &bytes)
                .await
                .with_context(|| format!("Failed to write blob: {}", tmp.display()))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("Failed to store blob: {}", path.display()))?;
            debug!(blob = %id, name, bytes = byte_size, "blob stored");
        }

        Ok(StoredBlob {
            view_url: format!("file://{}", path.display()),
            id,
            name: name.to_string(),
            byte_size,
        })
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("blob not found: {}", id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete blob: {}", id)),
        }
    }
}
