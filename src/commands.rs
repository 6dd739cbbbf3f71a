//! CLI command definitions and dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing;

use avatar_compute::{ComputeBridge, EngineBridge, WorkflowTemplate};
use avatar_core::config::AppConfig;
use avatar_core::error::AppError;
use avatar_core::traits::storage::ArtifactStore;
use avatar_job::JobOrchestrator;
use avatar_worker::{JobQueue, WorkerRunner};

/// Idle-avatar animation worker
#[derive(Debug, Parser)]
#[command(name = "idle-avatar-worker", version, about, long_about = None)]
pub struct Cli {
    /// Path to an extra configuration file (falls back to `AVATAR_CONFIG`)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Pull jobs from the provider queue until shut down
    Serve,
    /// Process a single job from a JSON file and print the result
    Run(RunArgs),
    /// Probe the compute engine and artifact store once
    Check,
}

/// Arguments for `run`
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Job input file (`-` for stdin)
    #[arg(short, long, default_value = "-")]
    pub input: String,

    /// Pretty-print the result
    #[arg(long)]
    pub pretty: bool,
}

impl Cli {
    /// Execute the selected command, returning the process exit code.
    pub async fn execute(&self, config: AppConfig) -> Result<i32, AppError> {
        match &self.command {
            None | Some(Commands::Serve) => serve(config).await.map(|_| 0),
            Some(Commands::Run(args)) => run_single(args, config).await,
            Some(Commands::Check) => check(config).await,
        }
    }
}

/// Everything a job needs, built once per process.
struct Components {
    store: Arc<dyn ArtifactStore>,
    bridge: Arc<dyn ComputeBridge>,
    template: WorkflowTemplate,
}

async fn build_components(config: &AppConfig) -> Result<Components, AppError> {
    tracing::info!(
        "Initializing artifact store (backend: {:?}, bucket: {})...",
        config.storage.backend,
        config.storage.bucket
    );
    let store = avatar_storage::build_store(&config.storage).await?;

    tracing::info!(
        "Loading workflow template from '{}'",
        config.generation.workflow_path.display()
    );
    let template = WorkflowTemplate::load(&config.generation.workflow_path).await?;

    let bridge = EngineBridge::new(&config.compute)?;
    tracing::info!(
        "Compute engine at {} (client id {})",
        config.compute.http_base_url(),
        bridge.client_id()
    );

    Ok(Components {
        store,
        bridge: Arc::new(bridge),
        template,
    })
}

async fn build_orchestrator(config: &AppConfig) -> Result<Arc<JobOrchestrator>, AppError> {
    let c = build_components(config).await?;
    let orchestrator = JobOrchestrator::new(config, c.store, c.bridge, c.template)?;
    Ok(Arc::new(orchestrator))
}

async fn serve(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting idle-avatar worker v{}", env!("CARGO_PKG_VERSION"));

    let orchestrator = build_orchestrator(&config).await?;
    let queue = Arc::new(JobQueue::new(&config.worker)?);
    let runner = WorkerRunner::new(queue, orchestrator, &config.worker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    runner.run(shutdown_rx).await;
    tracing::info!("Worker shut down gracefully");
    Ok(())
}

async fn run_single(args: &RunArgs, config: AppConfig) -> Result<i32, AppError> {
    let raw = if args.input == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(&args.input).await?
    };
    let input: serde_json::Value = serde_json::from_str(&raw)?;

    let orchestrator = build_orchestrator(&config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Interrupted, cancelling job");
        on_signal.cancel();
    });

    let result = orchestrator.process_value(input, cancel).await;
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{rendered}");

    Ok(if result.is_success() { 0 } else { 2 })
}

async fn check(config: AppConfig) -> Result<i32, AppError> {
    let c = build_components(&config).await?;
    let mut healthy = true;

    match c.bridge.check_ready().await {
        Ok(()) => tracing::info!("Compute engine is ready"),
        Err(e) => {
            healthy = false;
            tracing::error!("Compute engine check failed: {}", e);
        }
    }

    match c.store.health_check().await {
        Ok(true) => tracing::info!("Bucket '{}' is reachable", c.store.bucket()),
        Ok(false) => {
            healthy = false;
            tracing::error!("Bucket '{}' does not exist", c.store.bucket());
        }
        Err(e) => {
            healthy = false;
            tracing::error!("Artifact store check failed: {}", e);
        }
    }

    Ok(if healthy { 0 } else { 1 })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
