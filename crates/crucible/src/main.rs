//! Crucible Server
//!
//! Bare-metal provisioning control plane with a REST API and supervised
//! external plugins.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crucible::config::Config;
use crucible::plugin::{PluginRegistry, RegistrySettings};
use crucible::server::{AppState, Store, create_router};
use crucible::token::{RandomTokenIssuer, TokenIssuer};

/// Crucible Provisioning Server
#[derive(Parser, Debug)]
#[command(name = "crucible")]
#[command(about = "Crucible Provisioning Server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Directory for plugin sockets (overrides config)
    #[arg(long)]
    plugin_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crucible=info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(plugin_dir) = args.plugin_dir {
        config.plugin_dir = plugin_dir;
    }

    info!("Starting Crucible server v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.plugin_dir)?;

    let tokens: Arc<dyn TokenIssuer> = Arc::new(RandomTokenIssuer::new(config.api_token.clone()));
    let registry = Arc::new(PluginRegistry::new(
        RegistrySettings {
            comm_dir: config.plugin_dir.clone(),
            api_url: config.api_url(),
            fileserver_url: config.fileserver_url.clone(),
            load_timeout: config.load_timeout(),
        },
        Arc::clone(&tokens),
    ));

    let state = AppState::new(Arc::clone(&registry), Store::new(), tokens);
    let app = create_router(state);

    // The same surface is mounted on every plugin callback socket.
    registry.set_callback_router(app.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Plugin sockets under {}", config.plugin_dir.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal, then unload every remaining plugin
async fn shutdown_signal(registry: Arc<PluginRegistry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("Failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    info!("Unloading plugins...");
    registry.unload_all().await;
}
