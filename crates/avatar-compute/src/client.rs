//! HTTP side of the engine protocol: readiness probe, submission, history.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use avatar_core::config::ComputeConfig;

use crate::error::ComputeError;
use crate::workflow::JobDescription;

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 2000;

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    prompt: &'a JobDescription,
    client_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: String,
}

/// History entry of one engine job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecord {
    /// Node id → node output, in the order the engine reported them.
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

impl HistoryRecord {
    /// Full path of the first produced media item, scanning nodes in order.
    pub fn first_media_path(&self) -> Option<String> {
        self.outputs.iter().find_map(|(node_id, output)| {
            let media = output.get("gifs")?.as_array()?;
            let path = media
                .iter()
                .find_map(|item| item.get("fullpath").and_then(Value::as_str))?;
            debug!(node_id = %node_id, path, "Found media output");
            Some(path.to_string())
        })
    }
}

/// Thin HTTP client for the engine API.
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
    probe_attempts: u32,
    probe_interval: Duration,
}

impl EngineClient {
    /// Create a client from compute configuration.
    pub fn new(config: &ComputeConfig) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.http_base_url(),
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
            probe_attempts: config.probe_attempts,
            probe_interval: Duration::from_secs(config.probe_interval_seconds),
        })
    }

    /// Single readiness probe against the HTTP root.
    pub async fn probe(&self) -> bool {
        match self
            .http
            .get(format!("{}/", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Engine probe failed");
                false
            }
        }
    }

    /// Probe until the engine answers, up to the configured attempt count.
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<(), ComputeError> {
        info!(url = %self.base_url, "Checking compute engine");

        for attempt in 1..=self.probe_attempts {
            if cancel.is_cancelled() {
                return Err(ComputeError::Cancelled);
            }
            if self.probe().await {
                info!(attempt, "Compute engine HTTP ready");
                return Ok(());
            }
            if attempt < self.probe_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.probe_interval) => {}
                    _ = cancel.cancelled() => return Err(ComputeError::Cancelled),
                }
            }
        }

        warn!(attempts = self.probe_attempts, "Compute engine never became ready");
        Err(ComputeError::EngineNotReady {
            attempts: self.probe_attempts,
        })
    }

    /// Queue a job description and return the engine's job id.
    pub async fn submit(
        &self,
        description: &JobDescription,
        client_id: &str,
    ) -> Result<String, ComputeError> {
        let body = SubmitRequest {
            prompt: description,
            client_id,
        };

        let response = self
            .http
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await?;

        let response = Self::check_status("/prompt", response).await?;
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ComputeError::Protocol(format!("invalid /prompt response: {e}")))?;
        Ok(submitted.prompt_id)
    }

    /// Fetch the history record of a finished job.
    pub async fn history(&self, prompt_id: &str) -> Result<HistoryRecord, ComputeError> {
        let endpoint = format!("/history/{prompt_id}");
        let response = self
            .http
            .get(format!("{}{}", self.base_url, endpoint))
            .send()
            .await?;

        let response = Self::check_status(&endpoint, response).await?;
        let mut entries: Map<String, Value> = response
            .json()
            .await
            .map_err(|e| ComputeError::Protocol(format!("invalid history response: {e}")))?;

        let record = entries
            .remove(prompt_id)
            .ok_or_else(|| ComputeError::Protocol(format!("no history for job {prompt_id}")))?;
        Ok(serde_json::from_value(record)?)
    }

    async fn check_status(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComputeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ComputeError::Rejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        })
    }
}
