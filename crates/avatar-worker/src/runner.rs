//! Worker runner: main loop that pulls jobs and executes them one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing;

use avatar_core::config::WorkerConfig;
use avatar_job::JobOrchestrator;

use crate::queue::JobSource;

/// Main worker runner that polls the job source and executes jobs
#[derive(Debug)]
pub struct WorkerRunner {
    /// Where jobs come from
    source: Arc<dyn JobSource>,
    /// Job orchestrator
    orchestrator: Arc<JobOrchestrator>,
    /// Idle back-off between polls
    poll_interval: Duration,
    /// Worker identifier
    worker_id: String,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(
        source: Arc<dyn JobSource>,
        orchestrator: Arc<JobOrchestrator>,
        config: &WorkerConfig,
    ) -> Self {
        let worker_id = if config.worker_id.is_empty() {
            "local".to_string()
        } else {
            config.worker_id.clone()
        };
        Self {
            source,
            orchestrator,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            worker_id,
        }
    }

    /// Run until the shutdown signal is received.
    ///
    /// A job already taken from the source is always finished and reported
    /// before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Worker '{}' started, poll_interval={:?}",
            self.worker_id,
            self.poll_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Not raced against shutdown: a taken job must be reported.
            if self.run_once().await {
                continue;
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("Worker '{}' received shutdown signal", self.worker_id);
                    break;
                }
                _ = time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Worker '{}' shut down complete", self.worker_id);
    }

    /// Fetch and process at most one job. Returns whether a job was processed.
    pub async fn run_once(&self) -> bool {
        let job = match self.source.next_job().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::trace!("No job available");
                return false;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("Failed to fetch job, will retry: {}", e);
                return false;
            }
            Err(e) => {
                tracing::error!("Failed to fetch job: {}", e);
                return false;
            }
        };

        let job_id = job.id.clone();
        tracing::info!("Processing job: id={}", job_id);

        let result = self
            .orchestrator
            .process_value(job.input, CancellationToken::new())
            .await;

        if result.is_success() {
            tracing::info!("Job {} completed successfully", job_id);
        } else {
            tracing::warn!(
                "Job {} failed: {}",
                job_id,
                result.error().unwrap_or_default()
            );
        }

        if let Err(e) = self.source.post_result(&job_id, &result).await {
            tracing::error!("Failed to post result for job {}: {}", job_id, e);
        }
        true
    }
}
