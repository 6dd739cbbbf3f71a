//! # avatar-storage
//!
//! Artifact store implementations for the worker. Supports S3-compatible
//! object stores (MinIO, AWS) and a local directory backend for development.

pub mod manager;
pub mod providers;

pub use manager::build_store;
