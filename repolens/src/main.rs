//! Repolens client CLI.
//!
//! Submits analyses to the daemon, subscribes to the progress channel, and
//! renders progress lines until a terminal status arrives.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use repolens::{ApiClient, ConnectionManager};
use repolens_common::Config;
use repolens_common::errors::format::ConsoleFormatOptions;
use repolens_common::errors::{ErrorClassifier, ErrorContext, ErrorFormatter};
use repolens_common::progress::{AnalysisStatus, ProgressStore};

#[derive(Parser)]
#[command(name = "repolens")]
#[command(author, version, about = "Repolens - repository analysis client")]
struct Cli {
    /// Path to configuration file (defaults to ~/.config/repolens/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one repository and stream progress
    Analyze {
        /// Repository path
        path: PathBuf,
    },
    /// Analyze several repositories as a batch
    Batch {
        /// Repository paths
        paths: Vec<PathBuf>,
    },
    /// Cancel a running analysis
    Cancel {
        /// Analysis id returned at submission
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let api = ApiClient::new(config.daemon.http_base_url())?;

    match cli.command {
        Commands::Analyze { path } => {
            let id = api.submit_analysis(&path).await?;
            println!("analysis {} submitted", style(&id).cyan());
            stream_progress(&config, id).await
        }
        Commands::Batch { paths } => {
            if paths.is_empty() {
                bail!("batch requires at least one repository path");
            }
            let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
            let id = api.submit_batch(&refs).await?;
            println!("batch {} submitted", style(&id).cyan());
            stream_progress(&config, id).await
        }
        Commands::Cancel { id } => {
            if api.cancel_analysis(&id).await? {
                println!("analysis {} cancellation requested", style(&id).cyan());
            } else {
                println!("analysis {} is not running", style(&id).yellow());
            }
            Ok(())
        }
    }
}

/// Connect, subscribe, and render progress lines until a terminal status.
async fn stream_progress(config: &Config, analysis_id: String) -> Result<()> {
    let store = Arc::new(ProgressStore::new());
    let manager = ConnectionManager::new(config.daemon.ws_url(), config.reconnect, store.clone());

    // Subscribe before connect so the registration rides the handshake.
    manager.subscribe_to_analysis(analysis_id.clone()).await;
    manager.connect().await;

    let started = Instant::now();
    let mut watch = store.watch();
    let mut last_log: Option<String> = None;

    let final_status = loop {
        watch
            .changed()
            .await
            .context("progress channel closed unexpectedly")?;
        let snapshot = watch.borrow_and_update().clone();

        if snapshot.log != last_log
            && let Some(log) = &snapshot.log
        {
            let elapsed = humantime::format_duration(round_secs(started.elapsed()));
            println!("[{:>8}] {}", style(elapsed).dim(), log);
            last_log = snapshot.log.clone();
        }

        if snapshot.status.is_terminal() {
            break snapshot;
        }
    };

    manager.disconnect().await;

    match final_status.status {
        AnalysisStatus::Completed => {
            if let Some(results) = store.results() {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            println!("{}", style("analysis completed").green());
            Ok(())
        }
        AnalysisStatus::Failed => {
            let message = final_status
                .error
                .unwrap_or_else(|| "analysis failed".to_string());
            debug!(analysis_id = %analysis_id, "rendering failure");
            let classifier = ErrorClassifier::default();
            let error = classifier.classify_message(
                message,
                ErrorContext::new().with_correlation_id(analysis_id),
                None,
            );
            eprintln!(
                "{}",
                ErrorFormatter::new().format_for_console(&error, ConsoleFormatOptions::default())
            );
            bail!("analysis failed");
        }
        _ => unreachable!("loop exits only on terminal status"),
    }
}

fn round_secs(elapsed: Duration) -> Duration {
    Duration::from_secs(elapsed.as_secs())
}
