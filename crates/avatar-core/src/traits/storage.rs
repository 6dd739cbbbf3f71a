//! Artifact store trait for fetching and publishing named blobs.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::result::AppResult;

/// Object storage used to fetch driving videos and publish generated media.
///
/// Implementations are scoped to a single bucket. Keys are bucket-relative
/// and never start with `/`. The trait is defined here in `avatar-core` and
/// implemented in `avatar-storage`.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g. `"s3"`, `"local"`).
    fn provider_type(&self) -> &str;

    /// Bucket this store is scoped to.
    fn bucket(&self) -> &str;

    /// Check whether the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;

    /// Read an object into memory.
    async fn get_bytes(&self, key: &str) -> AppResult<Bytes>;

    /// Download an object to `dest`, creating parent directories. Returns bytes written.
    async fn get_to_file(&self, key: &str, dest: &Path) -> AppResult<u64>;

    /// Upload a local file under `key`.
    async fn put_file(&self, key: &str, src: &Path, content_type: &str) -> AppResult<()>;

    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> AppResult<()>;

    /// Produce a time-limited shareable URL for `key`.
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> AppResult<String>;
}
