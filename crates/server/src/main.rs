//! Larder server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use larder_core::config::AppConfig;
use larder_server::feed::HttpChangeFeed;
use larder_server::upstream::HttpUpstream;
use larder_server::{AppState, ReplicationController, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Larder - a caching proxy for the npm registry
#[derive(Parser, Debug)]
#[command(name = "larderd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LARDER_CONFIG",
        default_value = "config/larder.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Larder v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; defaults and LARDER_ env vars cover everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}, using defaults", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("LARDER_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    larder_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = larder_storage::from_config(&config.storage)
        .await
        .context("failed to initialize tarball storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(
        directory = %config.storage.binary_path().display(),
        "Tarball storage initialized"
    );

    let mirrors = larder_metadata::open_mirrors(&config.storage)
        .await
        .context("failed to open document mirrors")?;
    mirrors
        .local
        .health_check()
        .await
        .context("local mirror health check failed")?;
    mirrors
        .replica
        .health_check()
        .await
        .context("secondary mirror health check failed")?;
    tracing::info!("Document mirrors opened");

    let upstream = Arc::new(
        HttpUpstream::new(&config.upstream).context("failed to create upstream client")?,
    );

    let mut state = AppState::new(
        config.clone(),
        storage,
        mirrors.local.clone(),
        mirrors.replica.clone(),
        upstream,
    );

    let replication = if config.replication.enabled {
        let feed = HttpChangeFeed::new(&config.upstream)
            .context("failed to create change feed client")?;
        let handle = Arc::new(
            ReplicationController::new(
                Arc::new(feed),
                mirrors.replica.clone(),
                config.replication.clone(),
            )
            .start(),
        );
        state = state.with_replication(handle.clone());
        Some(handle)
    } else {
        tracing::info!("Replication disabled");
        None
    };

    let app = create_router(state);
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Listening on {}", addr);
    tracing::info!(
        "To start using larder, run: npm set registry {}",
        config.server.base_url()
    );
    tracing::info!(
        "To switch back, run: npm set registry {}",
        config.upstream.registry_url
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Replication writes into the secondary mirror, so it stops first.
    if let Some(handle) = replication {
        handle.cancel().await;
        tracing::info!("Replication cancelled");
    }
    mirrors.local.close().await;
    mirrors.replica.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
