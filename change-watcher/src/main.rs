use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use change_watcher::{
    Agent, AgentConfig, ConfigProvider, FileConfigSource, NotifyRegistry, PostgresStore, Recorder,
    WatchRegistry, WatchSetMaintainer, spawn_signal_listener,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Watch a directory tree and react to matching changes.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AgentConfig::from_file(&cli.config)
        .with_context(|| format!("Fatal error config file {}", cli.config.display()))?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("failed to open log file {}", config.log_file.display()))?;
    let (log_writer, _log_guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(log_writer)
                .with_ansi(false)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::WARN),
        )
        .init();

    let recorder = Recorder::new(Arc::new(PostgresStore::new(&config.db)));
    recorder
        .prepare()
        .await
        .inspect_err(|e| error!("Failed to create storage tables: {e}"))
        .context("failed to create storage tables")?;

    let (registry, events) = NotifyRegistry::new()
        .inspect_err(|e| error!("Error initializing watcher: {e}"))
        .context("Error initializing watcher")?;
    let registry = Arc::new(registry);
    registry
        .register(&config.path)
        .inspect_err(|e| error!("Error adding {} to watch: {e}", config.path.display()))
        .with_context(|| format!("Error adding path to watch: {}", config.path.display()))?;

    let interval = config.rescan_interval();
    let root = config.path.clone();
    let provider = ConfigProvider::with_initial(
        FileConfigSource::new(&cli.config),
        config.refresh_policy(),
        config,
    );

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let agent = Arc::new(Agent::new(
        Arc::new(provider),
        recorder,
        WatchSetMaintainer::new(root.clone(), registry.clone()),
        shutdown,
    ));

    println!("start!");
    info!("Watching {}", root.display());

    agent.run(events, interval).await;

    println!("\nExiting program...");
    info!("Shutting down");
    Ok(())
}
