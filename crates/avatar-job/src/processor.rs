//! Job orchestrator: drives one request from validation to published result.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use avatar_compute::{ComputeBridge, JobDescription, WorkflowTemplate};
use avatar_core::config::{AppConfig, GenerationConfig};
use avatar_core::traits::storage::ArtifactStore;

use crate::error::JobError;
use crate::input_resolver::InputResolver;
use crate::models::{
    FailedResult, GenerationMetadata, InlineResult, JobRequest, JobResult, PersistedResult,
};
use crate::publisher::{PublishOutcome, ResultPublisher, bytes_to_mb};
use crate::staging::StagedJob;

/// Produces the sampling seed for each job.
pub type SeedSource = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Lifecycle phase of a job, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Checking the request.
    Validating,
    /// Fetching or decoding inputs.
    Resolving,
    /// Copying inputs into the engine's input directory.
    Staging,
    /// Building and submitting the job description.
    Submitting,
    /// Waiting for the engine.
    Awaiting,
    /// Uploading or inlining the output.
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Resolving => "resolving",
            Self::Staging => "staging",
            Self::Submitting => "submitting",
            Self::Awaiting => "awaiting",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Orchestrates idle-animation jobs.
///
/// Every call to [`process`](Self::process) returns exactly one
/// [`JobResult`] and leaves no job files behind, whatever happens in
/// between. Jobs must not run concurrently against the same engine.
pub struct JobOrchestrator {
    resolver: InputResolver,
    publisher: ResultPublisher,
    bridge: Arc<dyn ComputeBridge>,
    template: WorkflowTemplate,
    generation: GenerationConfig,
    work_root: PathBuf,
    input_dir: PathBuf,
    seeds: SeedSource,
}

impl fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("bridge", &self.bridge)
            .field("work_root", &self.work_root)
            .field("input_dir", &self.input_dir)
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn ArtifactStore>,
        bridge: Arc<dyn ComputeBridge>,
        template: WorkflowTemplate,
    ) -> Result<Self, JobError> {
        Ok(Self {
            resolver: InputResolver::new(config, store.clone())?,
            publisher: ResultPublisher::new(config, store),
            bridge,
            template,
            generation: config.generation.clone(),
            work_root: config.worker.work_dir.clone(),
            input_dir: config.compute.input_dir.clone(),
            seeds: Arc::new(rand::random::<u32>),
        })
    }

    /// Replace the seed source.
    pub fn with_seed_source(mut self, seeds: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.seeds = Arc::new(seeds);
        self
    }

    /// Replace the result publisher.
    pub fn with_publisher(mut self, publisher: ResultPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Process a raw job input document.
    pub async fn process_value(&self, input: Value, cancel: CancellationToken) -> JobResult {
        match JobRequest::from_value(input) {
            Ok(request) => self.process_with_cancel(request, cancel).await,
            Err(e) => {
                warn!(error = %e, "Rejected malformed job input");
                JobResult::failure(e.to_string())
            }
        }
    }

    /// Process one request.
    pub async fn process(&self, request: JobRequest) -> JobResult {
        self.process_with_cancel(request, CancellationToken::new()).await
    }

    /// Process one request, aborting the engine wait when `cancel` fires.
    #[instrument(skip(self, request, cancel), fields(job_id = tracing::field::Empty))]
    pub async fn process_with_cancel(
        &self,
        request: JobRequest,
        cancel: CancellationToken,
    ) -> JobResult {
        let mut tracker = PhaseTracker::new(request.template().map(str::to_string));
        info!(request = %request.log_summary(), "Job received");

        if request.image_source().is_none() {
            return tracker.fail(JobError::MissingImage);
        }

        let mut staged =
            StagedJob::new(StagedJob::new_task_id(), &self.work_root, &self.input_dir);
        tracing::Span::current().record("job_id", staged.task_id());

        let pipeline = self.run_pipeline(&request, &mut staged, &mut tracker, cancel);
        let outcome = AssertUnwindSafe(pipeline).catch_unwind().await;

        // Synchronous cleanup of job files (best-effort)
        staged.cleanup();

        match outcome {
            Ok(Ok(result)) => {
                tracker.enter(JobPhase::Done);
                result
            }
            Ok(Err(e)) => tracker.fail(e),
            Err(panic) => tracker.fail(JobError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    async fn run_pipeline(
        &self,
        request: &JobRequest,
        staged: &mut StagedJob,
        tracker: &mut PhaseTracker,
        cancel: CancellationToken,
    ) -> Result<JobResult, JobError> {
        // Phase 1: Resolve inputs
        tracker.enter(JobPhase::Resolving);
        let inputs = self.resolver.resolve(request, staged).await?;

        // Phase 2: Stage into the engine's input directory
        tracker.enter(JobPhase::Staging);
        let names = staged.stage_inputs(&inputs.image, &inputs.video).await?;

        // Phase 3: Build and submit
        tracker.enter(JobPhase::Submitting);
        let seed = (self.seeds)();
        tracker.seed = Some(seed);
        let description = self.describe(request, &names.image_name, &names.video_name, seed)?;

        // Phase 4: Wait for the engine
        tracker.enter(JobPhase::Awaiting);
        let output = self
            .bridge
            .execute(&description, cancel)
            .await?
            .ok_or(JobError::NoOutput)?;
        info!(output = %output.display(), "Engine produced output");

        // Phase 5: Publish
        tracker.enter(JobPhase::Publishing);
        let metadata = self.metadata(seed, tracker.template_id.clone());
        let avatar_id = request.avatar_id_or_generated();
        let outcome = self
            .publisher
            .publish(&output, request.user_id_or_default(), &avatar_id)
            .await?;

        match outcome {
            PublishOutcome::Persisted { key, url } => Ok(JobResult::Persisted(PersistedResult {
                key,
                video_url: url,
                metadata,
            })),
            PublishOutcome::Inline {
                video_base64,
                storage_error,
            } => Ok(JobResult::Inline(InlineResult {
                video_base64,
                storage_error,
                metadata,
            })),
            PublishOutcome::TooLarge {
                storage_error,
                size_bytes,
                limit_bytes,
            } => Err(JobError::InlineTooLarge {
                size_mb: bytes_to_mb(size_bytes),
                limit_mb: limit_bytes / (1024 * 1024),
                storage_error,
            }),
        }
    }

    /// Fill the workflow template for one job.
    pub fn describe(
        &self,
        request: &JobRequest,
        image_name: &str,
        video_name: &str,
        seed: u32,
    ) -> Result<JobDescription, JobError> {
        let g = &self.generation;
        let positive = request.prompt.as_deref().unwrap_or(&g.positive_prompt);
        let negative = request
            .negative_prompt
            .as_deref()
            .unwrap_or(&g.negative_prompt);

        let description = self
            .template
            .builder()
            .inputs(image_name, video_name)
            .frame_rate(g.fps)
            .prompts(positive, negative)
            .sampling(seed, g.steps, g.cfg)
            .dimensions(g.width, g.height)
            .build()?;
        debug!(seed, image_name, video_name, "Job description built");
        Ok(description)
    }

    fn metadata(&self, seed: u32, template_id: Option<String>) -> GenerationMetadata {
        GenerationMetadata {
            seed,
            template_id,
            fps: self.generation.fps,
            width: self.generation.width,
            height: self.generation.height,
        }
    }
}

/// Tracks the current phase and what is known about the job so far.
#[derive(Debug)]
struct PhaseTracker {
    phase: JobPhase,
    seed: Option<u32>,
    template_id: Option<String>,
}

impl PhaseTracker {
    fn new(template_id: Option<String>) -> Self {
        Self {
            phase: JobPhase::Validating,
            seed: None,
            template_id,
        }
    }

    fn enter(&mut self, phase: JobPhase) {
        info!(from = %self.phase, to = %phase, "Job phase transition");
        self.phase = phase;
    }

    fn fail(&mut self, err: JobError) -> JobResult {
        error!(phase = %self.phase, error = %err, "Job failed");
        let storage_error = err.storage_error().map(str::to_string);
        self.phase = JobPhase::Failed;
        JobResult::Failed(FailedResult {
            error: err.to_string(),
            seed: self.seed,
            template_id: self.template_id.clone(),
            storage_error,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
