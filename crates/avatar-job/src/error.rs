//! Unified error type for one job's lifecycle.
//!
//! Every variant ends up as the `error` string of a failed
//! [`JobResult`](crate::models::JobResult); nothing here escapes the
//! orchestrator as an `Err`.

use avatar_compute::ComputeError;
use avatar_core::error::AppError;
use thiserror::Error;

/// Errors raised while processing a job.
#[derive(Debug, Error)]
pub enum JobError {
    // --- Validation ---
    /// Neither image source field was supplied.
    #[error("image_url or image_base64 is required")]
    MissingImage,

    /// No driving-video source resolved.
    #[error(
        "Provide one of: driving_video_url, driving_video_base64, driving_video_path, or template_id"
    )]
    MissingVideo,

    /// The named template has no file.
    #[error("Template '{template_id}' not found. Available: {available:?}")]
    TemplateNotFound {
        /// Requested template id.
        template_id: String,
        /// Template ids currently on disk.
        available: Vec<String>,
    },

    /// The job input could not be decoded.
    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    // --- Resolution ---
    /// A remote input could not be downloaded.
    #[error("Failed to download {url}: {reason}")]
    Download {
        /// Source URL.
        url: String,
        /// Failure description.
        reason: String,
    },

    /// An inline payload was not valid base64.
    #[error("Invalid base64 in {field}: {source}")]
    Decode {
        /// Request field holding the payload.
        field: &'static str,
        /// Decoder error.
        source: base64::DecodeError,
    },

    /// The artifact store failed.
    #[error("{0}")]
    Store(#[from] AppError),

    /// Local file I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Compute ---
    /// The compute bridge failed.
    #[error("{0}")]
    Compute(#[from] ComputeError),

    /// The engine finished without producing media.
    #[error("No video output from compute engine")]
    NoOutput,

    // --- Publishing ---
    /// The upload failed and the output is too large to return inline.
    #[error(
        "Upload failed and output is too large for base64 fallback ({size_mb:.1}MB > {limit_mb}MB)"
    )]
    InlineTooLarge {
        /// Output size in MB.
        size_mb: f64,
        /// Configured ceiling in MB.
        limit_mb: u64,
        /// Original upload error.
        storage_error: String,
    },

    // --- Internal ---
    /// The pipeline panicked.
    #[error("Internal error: {0}")]
    Panicked(String),
}

impl JobError {
    /// Upload error preserved alongside the failure, if any.
    pub fn storage_error(&self) -> Option<&str> {
        match self {
            Self::InlineTooLarge { storage_error, .. } => Some(storage_error),
            _ => None,
        }
    }

    /// Whether the failure was caused by the request itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingImage
                | Self::MissingVideo
                | Self::TemplateNotFound { .. }
                | Self::InvalidInput(_)
                | Self::Decode { .. }
        )
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Store(inner) => inner,
            JobError::Compute(inner) => inner.into(),
            other if other.is_validation() => AppError::validation(other.to_string()),
            other @ JobError::Download { .. } => AppError::external(other.to_string()),
            other @ JobError::InlineTooLarge { .. } => AppError::storage(other.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}
