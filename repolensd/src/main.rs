//! Repolens daemon.
//!
//! Serves the analysis HTTP API and the WebSocket progress channel.

#![forbid(unsafe_code)]

mod events;
mod http_api;
mod pipeline;
mod ws;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use repolens_common::Config;
use repolens_common::errors::ErrorClassifier;

use events::EventBus;
use http_api::AppState;
use pipeline::AnalysisPipeline;

#[derive(Parser)]
#[command(name = "repolensd")]
#[command(author, version, about = "Repolens daemon - analysis API and progress channel")]
struct Cli {
    /// Path to configuration file (defaults to ~/.config/repolens/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Include sanitized error context in API error responses
    #[arg(long)]
    verbose_errors: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Starting repolens daemon...");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let bind = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.daemon.host, config.daemon.port));

    let events = EventBus::default();
    let classifier = Arc::new(ErrorClassifier::new(config.history));
    let pipeline = Arc::new(AnalysisPipeline::new(events.clone(), classifier.clone()));

    let state = Arc::new(AppState {
        events,
        classifier,
        pipeline,
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
        verbose_errors: cli.verbose_errors,
    });
    let router = http_api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Listening on {}", bind);

    axum::serve(listener, router)
        .await
        .context("http server exited")?;
    Ok(())
}
