//! Domain models: job request, image/video sources, and the result document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JobError;

/// Strings longer than this are elided in request logs.
const LOG_TRUNCATE_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One job request. Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    /// Remote URL of the reference portrait.
    pub image_url: Option<String>,
    /// Base64-encoded reference portrait.
    pub image_base64: Option<String>,
    /// Remote URL of the driving video.
    pub driving_video_url: Option<String>,
    /// Base64-encoded driving video.
    pub driving_video_base64: Option<String>,
    /// Artifact-store key of the driving video, optionally `bucket/`-prefixed.
    pub driving_video_path: Option<String>,
    /// Named local driving-video template.
    pub template_id: Option<String>,
    /// Requester id, used as the output key prefix.
    pub user_id: Option<String>,
    /// Avatar/session id, used as the second output key segment.
    pub avatar_id: Option<String>,
    /// Positive prompt override.
    pub prompt: Option<String>,
    /// Negative prompt override.
    pub negative_prompt: Option<String>,
}

/// Where the reference image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// Download over HTTP(S).
    Url(&'a str),
    /// Decode an inline payload.
    Base64(&'a str),
}

/// Where the driving video comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource<'a> {
    /// Download over HTTP(S).
    Url(&'a str),
    /// Decode an inline payload.
    Base64(&'a str),
    /// Fetch from the artifact store; the raw key is not yet normalized.
    StoreKey(&'a str),
    /// Use a local template file.
    Template(&'a str),
}

impl JobRequest {
    /// Decode a job input document.
    ///
    /// Accepts both the wrapped `{"input": {...}}` envelope and a bare
    /// request object.
    pub fn from_value(value: Value) -> Result<Self, JobError> {
        let body = match value {
            Value::Object(mut map) if map.get("input").is_some_and(Value::is_object) => map
                .remove("input")
                .unwrap_or(Value::Object(Map::new())),
            other => other,
        };
        if !body.is_object() {
            return Err(JobError::InvalidInput(
                "job input must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(body).map_err(|e| JobError::InvalidInput(e.to_string()))
    }

    /// Select the image source: URL first, then base64.
    pub fn image_source(&self) -> Option<ImageSource<'_>> {
        if let Some(url) = present(&self.image_url) {
            return Some(ImageSource::Url(url));
        }
        present(&self.image_base64).map(ImageSource::Base64)
    }

    /// Whether more than one image source was supplied.
    pub fn has_ambiguous_image(&self) -> bool {
        present(&self.image_url).is_some() && present(&self.image_base64).is_some()
    }

    /// Select the driving-video source.
    ///
    /// Precedence is URL, base64, explicit store key, the configured default
    /// store key, then template. A template is only consulted when no store
    /// key (explicit or default) applies.
    pub fn video_source<'a>(&'a self, default_store_key: &'a str) -> Option<VideoSource<'a>> {
        if let Some(url) = present(&self.driving_video_url) {
            return Some(VideoSource::Url(url));
        }
        if let Some(data) = present(&self.driving_video_base64) {
            return Some(VideoSource::Base64(data));
        }
        if let Some(key) = present(&self.driving_video_path) {
            return Some(VideoSource::StoreKey(key));
        }
        if !default_store_key.trim().is_empty() {
            return Some(VideoSource::StoreKey(default_store_key));
        }
        present(&self.template_id).map(VideoSource::Template)
    }

    /// Template id, when one was supplied.
    pub fn template(&self) -> Option<&str> {
        present(&self.template_id)
    }

    /// Requester id, or `unknown`.
    pub fn user_id_or_default(&self) -> &str {
        present(&self.user_id).unwrap_or("unknown")
    }

    /// Avatar id, or a fresh 8-hex-character id.
    pub fn avatar_id_or_generated(&self) -> String {
        match present(&self.avatar_id) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        }
    }

    /// A loggable copy of the request with long strings elided.
    pub fn log_summary(&self) -> Value {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k, truncate_for_log(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Treat missing, empty, and whitespace-only strings alike.
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

fn truncate_for_log(value: Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > LOG_TRUNCATE_CHARS => {
            let head: String = s.chars().take(LOG_TRUNCATE_CHARS).collect();
            Value::String(format!("{head}..."))
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Generation parameters echoed back with every successful result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Seed used for sampling.
    pub seed: u32,
    /// Template id from the request, if any.
    pub template_id: Option<String>,
    /// Output frame rate.
    pub fps: u32,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

/// Output persisted to the artifact store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedResult {
    /// Object key in the artifact store.
    #[serde(rename = "minio_key")]
    pub key: String,
    /// Time-limited download URL.
    pub video_url: String,
    /// Generation parameters.
    #[serde(flatten)]
    pub metadata: GenerationMetadata,
}

/// Output returned inline because the upload failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineResult {
    /// Base64-encoded output video.
    pub video_base64: String,
    /// Upload error that triggered the fallback.
    #[serde(rename = "minio_error")]
    pub storage_error: String,
    /// Generation parameters.
    #[serde(flatten)]
    pub metadata: GenerationMetadata,
}

/// A failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedResult {
    /// Human-readable failure message.
    pub error: String,
    /// Seed, once one was drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    /// Template id from the request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Upload error, when the failure happened while publishing.
    #[serde(
        rename = "minio_error",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_error: Option<String>,
}

/// The single document returned for every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    /// Uploaded; carries a key and URL.
    Persisted(PersistedResult),
    /// Upload failed; carries the video inline.
    Inline(InlineResult),
    /// Carries an error message.
    Failed(FailedResult),
}

impl JobResult {
    /// Build a bare failure.
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failed(FailedResult {
            error: error.into(),
            seed: None,
            template_id: None,
            storage_error: None,
        })
    }

    /// Whether the job produced a video.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Failure message, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(f) => Some(&f.error),
            _ => None,
        }
    }

    /// Generation metadata of a successful result.
    pub fn metadata(&self) -> Option<&GenerationMetadata> {
        match self {
            Self::Persisted(r) => Some(&r.metadata),
            Self::Inline(r) => Some(&r.metadata),
            Self::Failed(_) => None,
        }
    }

    /// Serialize into the wire document.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("Failed to serialize job result: {e}") })
        })
    }
}
