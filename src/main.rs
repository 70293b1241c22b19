//! # Linewatch - production line monitor with AI-assisted diagnosis
//!
//! Polls the line backend, hands anomalies to a diagnosis session and
//! exposes everything through a line-oriented operator console.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use linewatch::backend::{Backend, HttpBackend};
use linewatch::config::Config;
use linewatch::coordinator::Coordinator;
use linewatch::diagnosis::ProviderKind;

/// Linewatch - production line monitor with anomaly diagnosis
#[derive(Parser, Debug)]
#[command(name = "linewatch", version, about = "Production line monitor with AI-assisted anomaly diagnosis")]
struct Cli {
    /// Base URL of the line backend (e.g. http://localhost:8000)
    #[arg(long, short = 'b', value_name = "URL")]
    backend: Option<String>,

    /// Config file to use instead of ~/.config/linewatch/config.toml
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, short = 'l', value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Directory CSV exports are written to
    #[arg(long, value_name = "DIR")]
    export_dir: Option<PathBuf>,

    /// Start with the remote analysis provider selected
    #[arg(long)]
    remote: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with console output
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Load and apply CLI overrides to config
    let mut config = match &cli.config {
        Some(path) if !path.exists() => bail!("config file {} not found", path.display()),
        Some(path) => Config::load_at(path),
        None => Config::load(),
    };
    if let Some(url) = cli.backend {
        config.backend_url = url.trim_end_matches('/').to_string();
    }
    if let Some(dir) = cli.export_dir {
        config.export_dir = dir;
    }
    if cli.remote {
        config.provider.set_kind(ProviderKind::Remote);
    }

    info!(
        backend = %config.backend_url,
        provider = %config.provider.kind,
        "starting linewatch"
    );

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(
        &config.backend_url,
        config.poll_timeout(),
        config.analyze_timeout(),
    ));
    let coordinator = Coordinator::new(backend, &config);
    let input = BufReader::new(tokio::io::stdin()).lines();

    console::Console::new(coordinator, input).run().await?;

    println!("linewatch stopped.");
    Ok(())
}
