//! Curio Daemon - Main entry point
//!
//! Hosts one viewer session and serves it to the browser frontend.

mod api;
mod bridge;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use curio_core::{BlobRegistry, MetadataStore};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "curio")]
#[command(about = "3D model viewer session daemon with AR, narration and lighting")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "curio.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// List the remote library and its metadata, then exit
    #[arg(long)]
    list_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Curio v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        store = ?config.store.kind,
        root = %config.store.root,
        "Configuration loaded"
    );

    if args.list_once {
        return list_library(&config).await;
    }

    let (state, scene_task) = state::AppState::new(config.clone())?;
    let scene = state.scene.clone();

    server::run(state, &config.daemon.bind, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })
    .await?;

    // Release the active model, stop narration and detach AR
    if let Err(e) = scene.shutdown().await {
        warn!(error = %e, "Scene was already closed");
    }
    scene_task.await?;

    Ok(())
}

/// Print the remote library with each model's history text
async fn list_library(config: &config::Config) -> Result<()> {
    let store = state::build_store(config)?;
    let resolver = state::build_resolver(config, store.clone(), BlobRegistry::default());
    let metadata = MetadataStore::new(store, config.store.metadata_object.clone());

    let assets = resolver.list_remote().await?;
    let index = match metadata.load().await {
        Ok(index) => Some(index),
        Err(e) => {
            warn!(error = %e, "Metadata unavailable");
            None
        }
    };

    println!("Found {} models:", assets.len());
    for asset in assets {
        println!("  - {} at {}", asset.display_name, asset.uri);
        let history = match &index {
            Some(index) => curio_core::lookup(index, &asset.display_name),
            None => curio_core::FALLBACK_HISTORY,
        };
        println!("    {}", history);
    }

    Ok(())
}
