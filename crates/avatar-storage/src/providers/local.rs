//! Local filesystem artifact store.
//!
//! Objects live at `<root>/<bucket>/<key>`. Shareable locators are
//! `file://` URLs, which is enough for development and tests.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use avatar_core::error::{AppError, ErrorKind};
use avatar_core::result::AppResult;
use avatar_core::traits::storage::ArtifactStore;

/// Directory-backed artifact store.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    /// Root directory holding one subdirectory per bucket.
    root: PathBuf,
    /// Bucket name.
    bucket: String,
}

impl LocalArtifactStore {
    /// Create a store rooted at `root`. The bucket directory is created lazily.
    pub async fn new(root: &Path, bucket: &str) -> AppResult<Self> {
        fs::create_dir_all(root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create storage root: {}", root.display()),
                e,
            )
        })?;
        let root = fs::canonicalize(root).await?;
        Ok(Self {
            root,
            bucket: bucket.to_string(),
        })
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    /// Resolve a key to a path inside the bucket directory.
    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        let clean = key.trim_start_matches('/');
        let relative = Path::new(clean);
        if clean.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::validation(format!("Invalid object key: {key}")));
        }
        Ok(self.bucket_dir().join(relative))
    }

    async fn ensure_parent(path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create parent directory: {}", parent.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    fn read_error(key: &str, e: std::io::Error) -> AppError {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::not_found(format!("Object not found: {key}"))
        } else {
            AppError::with_source(ErrorKind::Storage, format!("Failed to read object: {key}"), e)
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn provider_type(&self) -> &str {
        "local"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(self.root.is_dir())
    }

    async fn get_bytes(&self, key: &str) -> AppResult<Bytes> {
        let path = self.resolve(key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::read_error(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> AppResult<u64> {
        let path = self.resolve(key)?;
        Self::ensure_parent(dest).await?;
        let written = fs::copy(&path, dest)
            .await
            .map_err(|e| Self::read_error(key, e))?;
        debug!(key, dest = %dest.display(), bytes = written, "Fetched object");
        Ok(written)
    }

    async fn put_file(&self, key: &str, src: &Path, _content_type: &str) -> AppResult<()> {
        if !self.bucket_dir().is_dir() {
            return Err(AppError::not_found(format!(
                "Bucket does not exist: {}",
                self.bucket
            )));
        }
        let path = self.resolve(key)?;
        Self::ensure_parent(&path).await?;
        let written = fs::copy(src, &path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to store object: {key}"),
                e,
            )
        })?;
        debug!(key, bytes = written, "Stored object");
        Ok(())
    }

    async fn ensure_bucket(&self) -> AppResult<()> {
        fs::create_dir_all(self.bucket_dir()).await?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, _expires_in: Duration) -> AppResult<String> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(AppError::not_found(format!("Object not found: {key}")));
        }
        Ok(format!("file://{}", path.display()))
    }
}
