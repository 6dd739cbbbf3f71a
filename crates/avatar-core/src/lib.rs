//! # avatar-core
//!
//! Core crate for the idle-avatar worker. Contains the configuration schema,
//! the unified error system, and the [`ArtifactStore`](traits::storage::ArtifactStore)
//! trait shared by the input resolver and the result publisher.
//!
//! This crate has **no** internal dependencies on other avatar crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;
pub use result::AppResult;
