//! Job source abstraction and the provider webhook queue.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing;

use avatar_core::config::WorkerConfig;
use avatar_core::error::{AppError, ErrorKind};
use avatar_core::result::AppResult;
use avatar_job::JobResult;

/// Placeholder replaced by the worker id (GET) or job id (POST).
const ID_PLACEHOLDER: &str = "$ID";

/// A job handed out by the queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueuedJob {
    /// Provider job id.
    pub id: String,
    /// Raw job input.
    #[serde(default)]
    pub input: Value,
}

#[derive(Serialize)]
struct OutputEnvelope<'a> {
    output: &'a JobResult,
}

/// Where jobs come from and where results go.
#[async_trait]
pub trait JobSource: Send + Sync + std::fmt::Debug {
    /// Fetch the next job, or `None` when idle.
    async fn next_job(&self) -> AppResult<Option<QueuedJob>>;

    /// Report the result of a job.
    async fn post_result(&self, job_id: &str, result: &JobResult) -> AppResult<()>;
}

/// Job queue backed by the provider's HTTP webhooks
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// HTTP client
    http: reqwest::Client,
    /// URL template for fetching jobs
    get_job_url: String,
    /// URL template for posting results
    post_output_url: String,
    /// Value of the Authorization header
    api_key: String,
    /// Worker identifier substituted into the fetch URL
    worker_id: String,
}

impl JobQueue {
    /// Create a queue from worker configuration.
    pub fn new(config: &WorkerConfig) -> AppResult<Self> {
        let get_job_url = config
            .get_job_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::configuration("worker.get_job_url is not set"))?;
        let post_output_url = config
            .post_output_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::configuration("worker.post_output_url is not set"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.queue_timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to build queue client", e)
            })?;

        Ok(Self {
            http,
            get_job_url,
            post_output_url,
            api_key: config.api_key.clone(),
            worker_id: config.worker_id.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.header(reqwest::header::AUTHORIZATION, &self.api_key)
        }
    }
}

#[async_trait]
impl JobSource for JobQueue {
    async fn next_job(&self) -> AppResult<Option<QueuedJob>> {
        let url = self.get_job_url.replace(ID_PLACEHOLDER, &self.worker_id);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::ExternalService, "Job fetch failed", e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AppError::external(format!("Job fetch returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::ExternalService, "Job fetch failed", e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let job: QueuedJob = serde_json::from_slice(&body)?;
        tracing::debug!("Fetched job {}", job.id);
        Ok(Some(job))
    }

    async fn post_result(&self, job_id: &str, result: &JobResult) -> AppResult<()> {
        let url = self.post_output_url.replace(ID_PLACEHOLDER, job_id);
        let response = self
            .authorized(self.http.post(&url))
            .json(&OutputEnvelope { output: result })
            .send()
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::ExternalService, "Result post failed", e)
            })?;

        if !response.status().is_success() {
            return Err(AppError::external(format!(
                "Result post for job {job_id} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
