//! bizreg server - main entry point

use anyhow::Result;
use bizreg_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bizreg_server::{api, config::Config, db::DbConfig, features::imports::ImportTasks, store};

/// How long open connections get once imports have drained
const CONNECTION_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("bizreg-server")
        .filter_directives("bizreg_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting bizreg server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let store = store::open(config.import.store, &DbConfig::from(&config.database)).await?;
    info!(backend = store.backend(), "Company store ready");

    let tasks = ImportTasks::new();
    let app = api::create_router(store, &config, tasks.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let stop_accepting = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop_accepting.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        },
        _ = shutdown.cancelled() => {},
    }

    // Live progress streams end with their jobs, so drain imports first
    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    if !tasks.shutdown(grace).await {
        warn!("Some imports were interrupted and marked failed");
    }

    match tokio::time::timeout(CONNECTION_GRACE, server).await {
        Ok(result) => {
            result??;
            info!("Server shut down gracefully");
        },
        Err(_) => warn!("Connections still open after shutdown, exiting"),
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
