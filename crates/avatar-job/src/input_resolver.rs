//! Input resolution: turns request fields into local image/video files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use avatar_core::config::AppConfig;
use avatar_core::traits::storage::ArtifactStore;
use base64::Engine as _;
use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::models::{ImageSource, JobRequest, VideoSource};
use crate::staging::StagedJob;

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Local paths of the resolved inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInputs {
    /// Reference image.
    pub image: PathBuf,
    /// Driving video.
    pub video: PathBuf,
}

/// Resolves image and driving-video sources into local files.
#[derive(Debug, Clone)]
pub struct InputResolver {
    store: Arc<dyn ArtifactStore>,
    http: reqwest::Client,
    default_video_key: String,
    templates_dir: PathBuf,
}

impl InputResolver {
    /// Create a resolver from configuration.
    pub fn new(config: &AppConfig, store: Arc<dyn ArtifactStore>) -> Result<Self, JobError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.worker.download_timeout_seconds))
            .build()
            .map_err(|e| JobError::InvalidInput(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            store,
            http,
            default_video_key: config.generation.default_driving_video_path.clone(),
            templates_dir: config.generation.templates_dir.clone(),
        })
    }

    /// Resolve both inputs for a job into its scratch directory.
    pub async fn resolve(
        &self,
        request: &JobRequest,
        job: &StagedJob,
    ) -> Result<ResolvedInputs, JobError> {
        let image_source = request.image_source().ok_or(JobError::MissingImage)?;
        if request.has_ambiguous_image() {
            warn!("Both image_url and image_base64 supplied; using image_url");
        }

        job.prepare().await?;

        let image = self
            .resolve_image(image_source, &job.image_scratch_path())
            .await?;
        let video = self
            .resolve_video(request, &job.video_scratch_path())
            .await?;

        info!(
            image = %image.display(),
            video = %video.display(),
            "Inputs resolved"
        );
        Ok(ResolvedInputs { image, video })
    }

    /// Materialize the reference image at `dest`.
    pub async fn resolve_image(
        &self,
        source: ImageSource<'_>,
        dest: &Path,
    ) -> Result<PathBuf, JobError> {
        match source {
            ImageSource::Url(url) => self.download(url, dest).await,
            ImageSource::Base64(data) => decode_to_file(data, dest, "image_base64").await,
        }
    }

    /// Materialize the driving video.
    ///
    /// Returns `dest` for downloaded, decoded, and store-fetched videos, or
    /// the template file itself when a template is selected.
    pub async fn resolve_video(
        &self,
        request: &JobRequest,
        dest: &Path,
    ) -> Result<PathBuf, JobError> {
        let source = request
            .video_source(&self.default_video_key)
            .ok_or(JobError::MissingVideo)?;

        match source {
            VideoSource::Url(url) => self.download(url, dest).await,
            VideoSource::Base64(data) => decode_to_file(data, dest, "driving_video_base64").await,
            VideoSource::StoreKey(raw) => {
                let key = normalize_store_key(raw, self.store.bucket());
                let size = self.store.get_to_file(&key, dest).await?;
                debug!(key = %key, bytes = size, "Driving video fetched from store");
                Ok(dest.to_path_buf())
            }
            VideoSource::Template(template_id) => self.template_path(template_id).await,
        }
    }

    /// Sorted ids of the templates currently on disk.
    pub async fn available_templates(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.templates_dir).await else {
            return ids;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids
    }

    async fn template_path(&self, template_id: &str) -> Result<PathBuf, JobError> {
        let path = self.templates_dir.join(format!("{template_id}.mp4"));
        let safe = !template_id.contains(['/', '\\']) && template_id != ".." && template_id != ".";
        if safe && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(template_id, path = %path.display(), "Using driving-video template");
            return Ok(path);
        }
        Err(JobError::TemplateNotFound {
            template_id: template_id.to_string(),
            available: self.available_templates().await,
        })
    }

    /// Stream a remote resource to `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf, JobError> {
        let download_err = |reason: String| JobError::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_err(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url, bytes = written, dest = %dest.display(), "Downloaded input");
        Ok(dest.to_path_buf())
    }
}

/// Strip a leading `<bucket>/` prefix and any leading slashes from a key.
pub fn normalize_store_key(raw: &str, bucket: &str) -> String {
    let trimmed = raw.trim();
    let prefix = format!("{bucket}/");
    let without_bucket = trimmed.strip_prefix(prefix.as_str()).unwrap_or(trimmed);
    without_bucket.trim_start_matches('/').to_string()
}

/// Decode an inline payload, tolerating a `data:` URL prefix and whitespace.
async fn decode_to_file(
    data: &str,
    dest: &Path,
    field: &'static str,
) -> Result<PathBuf, JobError> {
    let payload = match data.split_once(";base64,") {
        Some((head, body)) if head.starts_with("data:") => body,
        _ => data,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = LENIENT_BASE64
        .decode(cleaned.as_bytes())
        .map_err(|source| JobError::Decode { field, source })?;

    tokio::fs::write(dest, &bytes).await?;
    debug!(field, bytes = bytes.len(), dest = %dest.display(), "Decoded inline input");
    Ok(dest.to_path_buf())
}
