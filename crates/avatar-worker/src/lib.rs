//! Serverless job loop for the idle-avatar worker.
//!
//! This crate provides:
//! - A job source abstraction plus the HTTP webhook implementation
//! - A worker runner that pulls one job at a time and posts its result

pub mod queue;
pub mod runner;

pub use queue::{JobQueue, JobSource, QueuedJob};
pub use runner::WorkerRunner;
