//! Idle-avatar worker: serverless entry point.
//!
//! Loads configuration, initializes logging, and dispatches to one of the
//! CLI commands in [`commands`].

use clap::Parser;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use avatar_core::config::{AppConfig, LogFormat};

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("AVATAR_CONFIG").map(std::path::PathBuf::from));

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    let code = match cli.execute(config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Worker error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let with_target = config.logging.with_target;

    match config.logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(with_target)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(with_target)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Compact => {
            fmt()
                .compact()
                .with_env_filter(filter)
                .with_target(with_target)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
