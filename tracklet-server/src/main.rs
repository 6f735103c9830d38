//! Tracklet server - session orchestration for video object tracking.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use tracklet_core::{Reaper, SessionStore, engine::synthetic::SyntheticEngine};
use tracklet_server::api::{ApiState, create_api_routes};
use tracklet_server::config::ConfigManager;
use tracklet_server::find_available_port;

/// Tracklet video tracking session server
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Start {
        /// Server port (automatically finds a free port if occupied)
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to a TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration and exit
    Config {
        /// Path to a TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

async fn start_server(preferred_port: u16, manager: &ConfigManager) -> Result<()> {
    let pb = ProgressBar::new(4);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>2}/{len:2} {msg}",
            )
            .context("Failed to create progress bar template")?
            .progress_chars("##-"),
    );

    // Stage 1: Engine and session store
    pb.set_position(1);
    pb.set_message("Initializing tracking engine and session store...");
    let core_config = manager.config().core_config();
    let sweep_interval = core_config.sweep_interval;
    let engine = Arc::new(SyntheticEngine::new());
    let store = Arc::new(SessionStore::new(core_config, engine));

    // Stage 2: Port discovery
    pb.set_position(2);
    pb.set_message("Discovering available network port...");
    let port = find_available_port(preferred_port)
        .await
        .context("Failed to find available port")?;
    if port != preferred_port {
        warn!(
            "Port {} was occupied, using port {} instead",
            preferred_port, port
        );
    }

    // Stage 3: Network binding
    pb.set_position(3);
    pb.set_message("Binding to network interface...");
    let host = manager.config().server.host.clone();
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("Invalid server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Stage 4: Background reaper
    pb.set_position(4);
    pb.set_message("Starting session reaper...");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_handle = Reaper::new(Arc::clone(&store), sweep_interval).spawn(shutdown_rx);
    pb.finish_with_message("Tracklet server ready");

    let app = create_api_routes().with_state(ApiState::new(store));

    println!();
    println!("Tracklet server listening on: http://{addr}");
    println!("Health endpoint: http://{addr}/health");
    println!("OpenAPI document: http://{addr}/api-docs/openapi.json");
    println!();
    info!("Tracklet server started successfully on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop the reaper with the server.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), reaper_handle)
        .await
        .is_err()
    {
        warn!("Reaper did not stop within 5s of shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

fn load_config(path: Option<PathBuf>) -> Result<ConfigManager> {
    match path {
        Some(path) => ConfigManager::load_with_path(path),
        None => ConfigManager::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Start { port, config } => {
            let manager = load_config(config)?;
            let preferred_port = port.unwrap_or(manager.config().server.port);
            start_server(preferred_port, &manager).await?;
        }
        Commands::Config { config } => {
            let manager = load_config(config)?;
            println!("{}", toml::to_string_pretty(manager.config())?);
        }
    }

    Ok(())
}
