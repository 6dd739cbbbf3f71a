//! Artifact store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Which artifact store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// S3-compatible object store (MinIO, AWS).
    S3,
    /// Directory on the local filesystem.
    Local,
}

/// Object storage settings used for driving-video fetches and result uploads.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// S3 endpoint, either `host:port` or a full URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Access key ID.
    #[serde(default)]
    pub access_key: String,
    /// Secret access key.
    #[serde(default)]
    pub secret_key: String,
    /// Bucket holding driving videos and generated results.
    #[serde(default = "default_bucket")]
    #[validate(length(min = 3, max = 63))]
    pub bucket: String,
    /// Use https when `endpoint` has no scheme.
    #[serde(default)]
    pub use_ssl: bool,
    /// Region sent with signed requests.
    #[serde(default = "default_region")]
    pub region: String,
    /// Lifetime of shareable URLs in seconds (S3 caps this at 7 days).
    #[serde(default = "default_presign_expiry")]
    #[validate(range(min = 1, max = 604_800))]
    pub presign_expiry_seconds: u64,
    /// Root directory for the local backend.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_endpoint(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: default_bucket(),
            use_ssl: false,
            region: default_region(),
            presign_expiry_seconds: default_presign_expiry(),
            local_root: default_local_root(),
        }
    }
}

impl StorageConfig {
    /// Endpoint as a full URL, adding the scheme implied by `use_ssl`.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.clone()
        } else if self.use_ssl {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::S3
}

fn default_endpoint() -> String {
    "localhost:9000".to_string()
}

fn default_bucket() -> String {
    "avatars".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presign_expiry() -> u64 {
    604_800 // 7 days
}

fn default_local_root() -> PathBuf {
    PathBuf::from("./data/artifacts")
}
