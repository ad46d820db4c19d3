//! Serve command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use logvault_core::{Config, LogVault};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the HTTP server and the maintenance scheduler.
pub async fn run(
    mut config: Config,
    bind: Option<String>,
    admin_api_key: Option<String>,
) -> Result<()> {
    // Apply CLI overrides
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }
    if let Some(key) = admin_api_key {
        config.server.admin_api_key = Some(key);
    }

    let bind_address = config.server.bind_address.clone();
    info!(
        bind = %bind_address,
        backend = %config.storage.backend,
        "Starting logvault server"
    );

    let vault = Arc::new(LogVault::open(config).await?);
    let scheduler = vault.scheduler();
    Arc::clone(&scheduler).start().await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = Arc::new(ServerState {
        vault: Arc::clone(&vault),
        scheduler: Some(Arc::clone(&scheduler)),
    });

    // Spawn a task to handle shutdown signals (SIGINT and SIGTERM)
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_signal.send(());
    });

    let served = start_server(state, &bind_address, shutdown_tx.subscribe()).await;

    scheduler.stop().await;
    info!("logvault server stopped");
    served
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler; only Ctrl+C will stop the server");
            }
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, initiating graceful shutdown");
}
