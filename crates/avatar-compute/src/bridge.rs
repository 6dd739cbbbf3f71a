//! Compute bridge: one job from submission to output path.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use avatar_core::config::ComputeConfig;

use crate::client::EngineClient;
use crate::error::ComputeError;
use crate::stream::{EventStream, StreamSettings};
use crate::workflow::JobDescription;

/// Runs job descriptions on a compute engine.
#[async_trait]
pub trait ComputeBridge: Send + Sync + std::fmt::Debug {
    /// Submit `description`, block until the engine reports completion, and
    /// return the path of the produced media, or `None` if no node produced any.
    async fn execute(
        &self,
        description: &JobDescription,
        cancel: CancellationToken,
    ) -> Result<Option<PathBuf>, ComputeError>;

    /// Single readiness check without retries.
    async fn check_ready(&self) -> Result<(), ComputeError>;
}

/// Bridge to the engine's HTTP + WebSocket API.
#[derive(Debug, Clone)]
pub struct EngineBridge {
    client: EngineClient,
    client_id: String,
    ws_url: String,
    stream: StreamSettings,
    deadline: Duration,
}

impl EngineBridge {
    /// Create a bridge with a fresh process-lifetime client id.
    pub fn new(config: &ComputeConfig) -> Result<Self, ComputeError> {
        Self::with_client_id(config, Uuid::new_v4().to_string())
    }

    /// Create a bridge with an explicit client id.
    pub fn with_client_id(
        config: &ComputeConfig,
        client_id: impl Into<String>,
    ) -> Result<Self, ComputeError> {
        let client_id = client_id.into();
        Ok(Self {
            client: EngineClient::new(config)?,
            ws_url: config.ws_url(&client_id),
            client_id,
            stream: StreamSettings {
                attempts: config.connect_attempts,
                retry_interval: Duration::from_secs(config.connect_interval_seconds),
                read_timeout: Duration::from_secs(config.read_timeout_seconds),
            },
            deadline: Duration::from_secs(config.job_deadline_seconds),
        })
    }

    /// Client id this bridge identifies itself with.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn submit_and_wait(
        &self,
        stream: &mut EventStream,
        description: &JobDescription,
        cancel: &CancellationToken,
    ) -> Result<String, ComputeError> {
        let prompt_id = self.client.submit(description, &self.client_id).await?;
        info!(prompt_id = %prompt_id, "Queued compute job");

        let completion = stream.wait_for_completion(&prompt_id);
        let completion = tokio::time::timeout(self.deadline, completion);
        tokio::select! {
            waited = completion => {
                match waited {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(ComputeError::DeadlineExceeded {
                            prompt_id: prompt_id.clone(),
                            seconds: self.deadline.as_secs(),
                        });
                    }
                }
            }
            _ = cancel.cancelled() => return Err(ComputeError::Cancelled),
        }

        Ok(prompt_id)
    }
}

#[async_trait]
impl ComputeBridge for EngineBridge {
    #[instrument(skip_all, fields(client_id = %self.client_id))]
    async fn execute(
        &self,
        description: &JobDescription,
        cancel: CancellationToken,
    ) -> Result<Option<PathBuf>, ComputeError> {
        self.client.wait_until_ready(&cancel).await?;

        let mut stream = EventStream::connect(&self.ws_url, self.stream, &cancel).await?;
        let waited = self.submit_and_wait(&mut stream, description, &cancel).await;
        stream.close().await;
        let prompt_id = waited?;

        let record = self.client.history(&prompt_id).await?;
        let output = record.first_media_path().map(PathBuf::from);
        if output.is_none() {
            warn!(prompt_id = %prompt_id, "Compute job produced no media");
        }
        Ok(output)
    }

    async fn check_ready(&self) -> Result<(), ComputeError> {
        if self.client.probe().await {
            Ok(())
        } else {
            Err(ComputeError::EngineNotReady { attempts: 1 })
        }
    }
}
