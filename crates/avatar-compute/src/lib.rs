//! # avatar-compute
//!
//! Drives one job at a time through the external node-graph inference
//! engine: HTTP readiness probing, a persistent event stream keyed by a
//! process-lifetime client id, job submission, completion detection, and
//! output lookup in the job history.
//!
//! ## Single-flight precondition
//!
//! The client id of an [`EngineBridge`] is fixed for the life of the
//! process, so every job submitted through one bridge shares a stream
//! identity. Callers must run at most one job per bridge at a time; a
//! worker that needs concurrent jobs must build one bridge per job.

pub mod bridge;
pub mod client;
pub mod error;
pub mod stream;
pub mod workflow;

pub use bridge::{ComputeBridge, EngineBridge};
pub use error::ComputeError;
pub use workflow::{JobDescription, JobDescriptionBuilder, Slot, WorkflowTemplate};
