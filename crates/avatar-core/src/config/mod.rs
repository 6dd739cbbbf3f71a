//! Worker configuration schema and loading.
//!
//! The configuration is built once at process start from (in increasing
//! precedence) `config/default.toml`, an explicit file, `AVATAR_*`
//! environment variables, and the flat variable names older deployments
//! export. The resulting [`AppConfig`] is passed by reference to every
//! component constructor.

pub mod compute;
pub mod generation;
pub mod logging;
pub mod storage;
pub mod worker;

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::compute::ComputeConfig;
pub use self::generation::GenerationConfig;
pub use self::logging::{LogFormat, LoggingConfig};
pub use self::storage::{StorageBackend, StorageConfig};
pub use self::worker::WorkerConfig;

use crate::result::AppResult;

/// Flat environment variables mapped onto configuration keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("SERVER_ADDRESS", "compute.host"),
    ("MINIO_ENDPOINT", "storage.endpoint"),
    ("MINIO_ACCESS_KEY", "storage.access_key"),
    ("MINIO_SECRET_KEY", "storage.secret_key"),
    ("MINIO_BUCKET", "storage.bucket"),
    ("MINIO_USE_SSL", "storage.use_ssl"),
    ("DEFAULT_DRIVING_VIDEO_PATH", "generation.default_driving_video_path"),
    ("VIDEO_WIDTH", "generation.width"),
    ("VIDEO_HEIGHT", "generation.height"),
    ("TEMPLATES_DIR", "generation.templates_dir"),
    ("WORKFLOW_PATH", "generation.workflow_path"),
    ("BASE64_FALLBACK_MAX_MB", "generation.inline_fallback_max_mb"),
    ("RUNPOD_WEBHOOK_GET_JOB", "worker.get_job_url"),
    ("RUNPOD_WEBHOOK_POST_OUTPUT", "worker.post_output_url"),
    ("RUNPOD_AI_API_KEY", "worker.api_key"),
    ("RUNPOD_POD_ID", "worker.worker_id"),
];

/// Root worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// Compute engine connection settings.
    #[serde(default)]
    #[validate(nested)]
    pub compute: ComputeConfig,
    /// Artifact store settings.
    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,
    /// Generation parameters.
    #[serde(default)]
    #[validate(nested)]
    pub generation: GenerationConfig,
    /// Job intake settings.
    #[serde(default)]
    #[validate(nested)]
    pub worker: WorkerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from files and the process environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load configuration, resolving the flat legacy variables through `lookup`.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AVATAR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV {
            let value = lookup(var).filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
