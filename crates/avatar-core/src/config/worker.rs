//! Serverless worker loop configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Job intake and local scratch settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Root for per-job scratch directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Timeout for downloading remote inputs.
    #[serde(default = "default_download_timeout")]
    #[validate(range(min = 1, max = 3600))]
    pub download_timeout_seconds: u64,
    /// Identifier this worker reports to the job queue. Empty means generate one.
    #[serde(default)]
    pub worker_id: String,
    /// Job fetch URL; `$ID` is replaced with the worker id.
    #[serde(default)]
    pub get_job_url: Option<String>,
    /// Result post URL; `$ID` is replaced with the job id.
    #[serde(default)]
    pub post_output_url: Option<String>,
    /// Value of the `Authorization` header sent to the job queue.
    #[serde(default)]
    pub api_key: String,
    /// Seconds to wait between polls when the queue is idle or failing.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// HTTP timeout for job queue requests (long-poll aware).
    #[serde(default = "default_queue_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub queue_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            download_timeout_seconds: default_download_timeout(),
            worker_id: String::new(),
            get_job_url: None,
            post_output_url: None,
            api_key: String::new(),
            poll_interval_seconds: default_poll_interval(),
            queue_timeout_seconds: default_queue_timeout(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("idle-avatar")
}

fn default_download_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    1
}

fn default_queue_timeout() -> u64 {
    90
}
