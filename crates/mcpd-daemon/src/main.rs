//! The mcpd daemon: supervises MCP servers' plugins and fronts them with
//! the pipeline-wrapped HTTP surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mcpd_config::McpdConfig;
use mcpd_context::ExecutionContextStore;
use mcpd_gateway::router;
use mcpd_plugins::{PluginPipeline, PluginSupervisor};

/// File under the user config directory holding execution contexts.
const CONTEXT_FILE_NAME: &str = "secrets.dev.toml";

#[derive(Debug, Parser)]
#[command(name = "mcpd", about = "MCP server daemon", version)]
struct Cli {
    /// Log filter (overridden by `RUST_LOG` when set).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daemon.
    Daemon {
        /// Path to the project configuration.
        #[arg(long, default_value = ".mcpd.toml")]
        config: PathBuf,

        /// Address to serve the control/proxy surface on.
        #[arg(long, default_value = "127.0.0.1:8090")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Daemon { config, addr } => run_daemon(&config, addr).await,
    }
}

async fn run_daemon(config_path: &std::path::Path, addr: SocketAddr) -> anyhow::Result<()> {
    let config = McpdConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(
        servers = config.servers.len(),
        config = %config_path.display(),
        "configuration loaded"
    );

    // Execution contexts feed the server launcher; loading them up front
    // surfaces malformed files before any server starts.
    let context_path = mcpd_core::dirs::user_config_dir()
        .context("resolving user config directory")?
        .join(CONTEXT_FILE_NAME);
    let contexts = ExecutionContextStore::load(&context_path)
        .with_context(|| format!("loading {}", context_path.display()))?;
    info!(contexts = contexts.len(), "execution contexts loaded");

    let pipeline = Arc::new(PluginPipeline::new());
    let supervisor = Arc::new(PluginSupervisor::new(
        config.plugins.clone().unwrap_or_default(),
        Arc::clone(&pipeline),
    ));
    supervisor.start_plugins().await.context("starting plugins")?;

    let app = router(Arc::clone(&supervisor), upstream_router());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "daemon listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutting down plugins");
    let stop_result = supervisor.stop_plugins().await;

    serve_result.context("serving")?;
    if let Err(e) = stop_result {
        warn!(error = %e, "plugin shutdown reported failures");
        return Err(anyhow::Error::new(e).context("stopping plugins"));
    }

    info!("daemon stopped");
    Ok(())
}

/// Routes for the proxied MCP server surface. The actual request
/// forwarding to running servers lives in the proxy layer; unknown routes
/// are answered here so the middleware still wraps them.
fn upstream_router() -> Router {
    Router::new().fallback(|| async { (StatusCode::NOT_FOUND, "no such route") })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install shutdown handler");
    }
}
