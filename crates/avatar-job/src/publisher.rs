//! Result publishing: upload to the artifact store, or return inline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use avatar_core::config::AppConfig;
use avatar_core::result::AppResult;
use avatar_core::traits::storage::ArtifactStore;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::JobError;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// How a finished video was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Uploaded and signed.
    Persisted {
        /// Object key.
        key: String,
        /// Time-limited download URL.
        url: String,
    },
    /// Upload failed; the video is returned inline.
    Inline {
        /// Base64-encoded video.
        video_base64: String,
        /// Upload error.
        storage_error: String,
    },
    /// Upload failed and the video exceeds the inline ceiling.
    TooLarge {
        /// Upload error.
        storage_error: String,
        /// Video size in bytes.
        size_bytes: u64,
        /// Inline ceiling in bytes.
        limit_bytes: u64,
    },
}

/// Uploads finished videos, falling back to inline base64.
#[derive(Debug, Clone)]
pub struct ResultPublisher {
    store: Arc<dyn ArtifactStore>,
    url_expiry: Duration,
    inline_max_bytes: u64,
}

impl ResultPublisher {
    /// Create a publisher from configuration.
    pub fn new(config: &AppConfig, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            url_expiry: Duration::from_secs(config.storage.presign_expiry_seconds),
            inline_max_bytes: config.generation.inline_fallback_max_bytes(),
        }
    }

    /// Override the inline ceiling.
    pub fn with_inline_max_bytes(mut self, bytes: u64) -> Self {
        self.inline_max_bytes = bytes;
        self
    }

    /// `<user>/<avatar>/idle_<YYYYMMDD_HHMMSS>.mp4`
    pub fn object_key(user_id: &str, avatar_id: &str, at: DateTime<Utc>) -> String {
        format!("{user_id}/{avatar_id}/idle_{}.mp4", at.format("%Y%m%d_%H%M%S"))
    }

    /// Publish `output` under a fresh key for the given ids.
    ///
    /// Returns `Err` only when the inline fallback itself cannot read the
    /// file; upload failures are reported through [`PublishOutcome`].
    pub async fn publish(
        &self,
        output: &Path,
        user_id: &str,
        avatar_id: &str,
    ) -> Result<PublishOutcome, JobError> {
        let key = Self::object_key(user_id, avatar_id, Utc::now());

        let storage_error = match self.persist(output, &key).await {
            Ok(url) => {
                info!(key = %key, "Output uploaded");
                return Ok(PublishOutcome::Persisted { key, url });
            }
            Err(e) => e.to_string(),
        };
        warn!(key = %key, error = %storage_error, "Upload failed, falling back to inline result");

        let size_bytes = tokio::fs::metadata(output).await?.len();
        if size_bytes > self.inline_max_bytes {
            warn!(
                size_mb = bytes_to_mb(size_bytes),
                limit_mb = bytes_to_mb(self.inline_max_bytes),
                "Output too large for inline fallback"
            );
            return Ok(PublishOutcome::TooLarge {
                storage_error,
                size_bytes,
                limit_bytes: self.inline_max_bytes,
            });
        }

        let bytes = tokio::fs::read(output).await?;
        Ok(PublishOutcome::Inline {
            video_base64: STANDARD.encode(&bytes),
            storage_error,
        })
    }

    async fn persist(&self, output: &Path, key: &str) -> AppResult<String> {
        self.store.ensure_bucket().await?;
        self.store.put_file(key, output, VIDEO_CONTENT_TYPE).await?;
        self.store.presigned_url(key, self.url_expiry).await
    }
}

/// Convert a byte count to MB for user-facing messages.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}
