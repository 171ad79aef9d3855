//! etcd Backup Kubernetes Operator
//!
//! Main entry point. Parses configuration, wires the executor and storage
//! backends, and runs the EtcdBackup controller until a shutdown signal.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use etcd_backup_operator::{
    backup::{BackupExecutor, EtcdGatewaySnapshotter},
    config::OperatorConfig,
    controllers, metrics,
    storage::CloudStorageProvider,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    let config = Arc::new(OperatorConfig::parse());
    info!(version = env!("CARGO_PKG_VERSION"), "Starting etcd Backup Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let executor = Arc::new(BackupExecutor::new(
        Arc::new(EtcdGatewaySnapshotter::new(client.clone())),
        Arc::new(CloudStorageProvider::new(config.abs_block_size)),
        &config,
    ));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let shutdown = CancellationToken::new();
    let controller = tokio::spawn(controllers::run_backup_controller(
        client,
        executor,
        config.clone(),
        shutdown.clone(),
    ));

    // Handle graceful shutdown
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
        result = metrics_handle => {
            error!(?result, "Metrics server exited unexpectedly");
        }
    }

    shutdown.cancel();
    if let Err(e) = controller.await {
        error!(error = %e, "EtcdBackup controller panicked");
    }

    info!("etcd Backup Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
