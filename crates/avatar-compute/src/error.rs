//! Errors raised while talking to the compute engine.

use avatar_core::error::{AppError, ErrorKind};
use thiserror::Error;

/// Unified error type for compute bridge operations.
#[derive(Debug, Error)]
pub enum ComputeError {
    // --- Connectivity ---
    /// The HTTP root never answered successfully.
    #[error("Compute engine not reachable after {attempts} attempts")]
    EngineNotReady {
        /// Number of probes made.
        attempts: u32,
    },

    /// The event stream could not be opened.
    #[error("Event stream connection failed after {attempts} attempts: {reason}")]
    StreamUnavailable {
        /// Number of connection attempts made.
        attempts: u32,
        /// Last connection error.
        reason: String,
    },

    // --- Protocol ---
    /// An HTTP request to the engine failed.
    #[error("Compute engine request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine answered with a non-success status.
    #[error("Compute engine returned {status} for {endpoint}: {body}")]
    Rejected {
        /// Endpoint path.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The event stream failed mid-job.
    #[error("Event stream error: {0}")]
    Stream(Box<tokio_tungstenite::tungstenite::Error>),

    /// The event stream ended before the terminal signal.
    #[error("Event stream closed before job {prompt_id} finished")]
    StreamClosed {
        /// Engine job identifier.
        prompt_id: String,
    },

    /// The engine response did not have the expected shape.
    #[error("Malformed compute engine response: {0}")]
    Protocol(String),

    // --- Deadlines ---
    /// No message arrived within the stream read timeout.
    #[error("No event from compute engine for {seconds}s")]
    ReadTimeout {
        /// Read timeout that elapsed.
        seconds: u64,
    },

    /// The job did not finish within the overall deadline.
    #[error("Job {prompt_id} did not finish within {seconds}s")]
    DeadlineExceeded {
        /// Engine job identifier.
        prompt_id: String,
        /// Deadline that elapsed.
        seconds: u64,
    },

    /// The wait was cancelled by the caller.
    #[error("Compute job was cancelled")]
    Cancelled,

    // --- Job description ---
    /// The workflow template does not contain an addressed node input.
    #[error("Workflow template has no input '{input}' on node '{node}' (slot {slot})")]
    UnboundSlot {
        /// Slot name.
        slot: &'static str,
        /// Node id the slot is bound to.
        node: String,
        /// Input name the slot is bound to.
        input: String,
    },

    /// A slot was never given a value.
    #[error("Job description slot '{0}' was not set")]
    MissingSlot(&'static str),

    /// The workflow template could not be parsed.
    #[error("Invalid workflow template: {0}")]
    Template(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading the workflow template failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ComputeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Stream(Box::new(err))
    }
}

impl ComputeError {
    /// Whether the error is a connectivity failure (engine or stream unreachable).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::EngineNotReady { .. } | Self::StreamUnavailable { .. }
        )
    }
}

impl From<ComputeError> for AppError {
    fn from(err: ComputeError) -> Self {
        let kind = match &err {
            e if e.is_connectivity() => ErrorKind::ServiceUnavailable,
            ComputeError::ReadTimeout { .. } | ComputeError::DeadlineExceeded { .. } => {
                ErrorKind::Timeout
            }
            ComputeError::UnboundSlot { .. }
            | ComputeError::MissingSlot(_)
            | ComputeError::Template(_) => ErrorKind::Configuration,
            _ => ErrorKind::ExternalService,
        };
        AppError::new(kind, err.to_string())
    }
}
