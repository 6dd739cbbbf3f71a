//! Convenience result type alias for the worker.

use crate::error::AppError;

/// A specialized `Result` type for worker operations.
pub type AppResult<T> = Result<T, AppError>;
