//! Store construction from configuration.

use std::sync::Arc;

use avatar_core::config::{StorageBackend, StorageConfig};
use avatar_core::result::AppResult;
use avatar_core::traits::storage::ArtifactStore;

use crate::providers::LocalArtifactStore;

/// Build the artifact store selected by `config.backend`.
pub async fn build_store(config: &StorageConfig) -> AppResult<Arc<dyn ArtifactStore>> {
    match config.backend {
        StorageBackend::Local => {
            let store = LocalArtifactStore::new(&config.local_root, &config.bucket).await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let store = crate::providers::S3ArtifactStore::new(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => Err(avatar_core::AppError::configuration(
            "S3 backend requested but avatar-storage was built without the `s3` feature",
        )),
    }
}
