//! Event stream side of the engine protocol.
//!
//! The engine pushes JSON text frames `{type, data}` and binary preview
//! frames over a WebSocket opened with the worker's client id. A job is
//! finished when an `executing` frame for its id reports `node: null`.

use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::ComputeError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One decoded text frame.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineEvent {
    /// Event type (`status`, `progress`, `executing`, `executed`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl EngineEvent {
    /// Whether this event signals that `prompt_id` finished executing.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        self.kind == "executing"
            && self.data.get("node").is_some_and(Value::is_null)
            && self.data.get("prompt_id").and_then(Value::as_str) == Some(prompt_id)
    }
}

/// Connection retry and read-timeout settings.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Connection attempts before giving up.
    pub attempts: u32,
    /// Delay between attempts.
    pub retry_interval: Duration,
    /// Longest tolerated silence while waiting for completion.
    pub read_timeout: Duration,
}

/// An open event stream.
pub struct EventStream {
    socket: Socket,
    read_timeout: Duration,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl EventStream {
    /// Connect to `url`, retrying at a fixed interval.
    pub async fn connect(
        url: &str,
        settings: StreamSettings,
        cancel: &CancellationToken,
    ) -> Result<Self, ComputeError> {
        let mut last_error = String::new();

        for attempt in 1..=settings.attempts {
            if cancel.is_cancelled() {
                return Err(ComputeError::Cancelled);
            }

            match tokio_tungstenite::connect_async(url).await {
                Ok((socket, _response)) => {
                    info!(attempt, "Event stream connected");
                    return Ok(Self {
                        socket,
                        read_timeout: settings.read_timeout,
                    });
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Event stream connection failed");
                    last_error = e.to_string();
                }
            }

            if attempt < settings.attempts {
                tokio::select! {
                    _ = tokio::time::sleep(settings.retry_interval) => {}
                    _ = cancel.cancelled() => return Err(ComputeError::Cancelled),
                }
            }
        }

        warn!(attempts = settings.attempts, error = %last_error, "Event stream unavailable");
        Err(ComputeError::StreamUnavailable {
            attempts: settings.attempts,
            reason: last_error,
        })
    }

    /// Read frames until the completion signal for `prompt_id` arrives.
    ///
    /// Binary frames and every other event type are skipped. Each read is
    /// bounded by the stream read timeout.
    pub async fn wait_for_completion(&mut self, prompt_id: &str) -> Result<(), ComputeError> {
        loop {
            let next = tokio::time::timeout(self.read_timeout, self.socket.next())
                .await
                .map_err(|_| ComputeError::ReadTimeout {
                    seconds: self.read_timeout.as_secs(),
                })?;

            match next {
                None | Some(Ok(Message::Close(_))) => {
                    return Err(ComputeError::StreamClosed {
                        prompt_id: prompt_id.to_string(),
                    });
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<EngineEvent>(text.as_str()) {
                        Ok(event) if event.is_completion_of(prompt_id) => {
                            info!(prompt_id, "Compute job finished");
                            return Ok(());
                        }
                        Ok(event) if event.kind == "execution_error" => {
                            warn!(
                                prompt_id,
                                data = %event.data,
                                "Engine reported an execution error"
                            );
                        }
                        Ok(event) => {
                            trace!(kind = %event.kind, "Engine event");
                        }
                        Err(e) => {
                            debug!(error = %e, "Ignoring undecodable engine frame");
                        }
                    }
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Close the stream, ignoring errors.
    pub async fn close(mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(error = %e, "Event stream close failed");
        }
    }
}
