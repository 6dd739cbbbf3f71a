//! # avatar-job
//!
//! The job orchestration core. One [`JobOrchestrator`] call takes a request
//! through validation, input resolution, staging into the compute engine's
//! input directory, job submission, and result publishing, and always
//! removes every staged file before returning a [`JobResult`].

pub mod error;
pub mod input_resolver;
pub mod models;
pub mod processor;
pub mod publisher;
pub mod staging;

pub use error::JobError;
pub use input_resolver::InputResolver;
pub use models::{GenerationMetadata, JobRequest, JobResult};
pub use processor::JobOrchestrator;
pub use publisher::{PublishOutcome, ResultPublisher};
pub use staging::StagedJob;
