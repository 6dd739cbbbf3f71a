//! Core traits implemented by other crates.

pub mod storage;

pub use storage::ArtifactStore;
