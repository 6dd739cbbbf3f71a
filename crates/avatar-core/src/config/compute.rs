//! Compute engine connection configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Settings for reaching the local node-graph inference engine.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ComputeConfig {
    /// Host the engine listens on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Engine HTTP/WebSocket port.
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,
    /// Directory the engine discovers input files in.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Number of HTTP readiness probes before giving up.
    #[serde(default = "default_probe_attempts")]
    #[validate(range(min = 1, max = 3600))]
    pub probe_attempts: u32,
    /// Seconds between readiness probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,
    /// Per-probe HTTP timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    #[validate(range(min = 1, max = 60))]
    pub probe_timeout_seconds: u64,
    /// Number of event-stream connection attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    #[validate(range(min = 1, max = 720))]
    pub connect_attempts: u32,
    /// Seconds between event-stream connection attempts.
    #[serde(default = "default_connect_interval")]
    pub connect_interval_seconds: u64,
    /// Maximum silence on the event stream before the wait fails.
    #[serde(default = "default_read_timeout")]
    #[validate(range(min = 1))]
    pub read_timeout_seconds: u64,
    /// Overall deadline for one job's completion wait.
    #[serde(default = "default_job_deadline")]
    #[validate(range(min = 1))]
    pub job_deadline_seconds: u64,
    /// Timeout for submission and history requests.
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_seconds: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            input_dir: default_input_dir(),
            probe_attempts: default_probe_attempts(),
            probe_interval_seconds: default_probe_interval(),
            probe_timeout_seconds: default_probe_timeout(),
            connect_attempts: default_connect_attempts(),
            connect_interval_seconds: default_connect_interval(),
            read_timeout_seconds: default_read_timeout(),
            job_deadline_seconds: default_job_deadline(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ComputeConfig {
    /// Base URL of the engine's HTTP API, without a trailing slash.
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Event-stream URL for the given client identifier.
    pub fn ws_url(&self, client_id: &str) -> String {
        format!("ws://{}:{}/ws?clientId={}", self.host, self.port, client_id)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8188
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("/ComfyUI/input")
}

fn default_probe_attempts() -> u32 {
    180
}

fn default_probe_interval() -> u64 {
    1
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_connect_attempts() -> u32 {
    36
}

fn default_connect_interval() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    3600
}

fn default_job_deadline() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    30
}
