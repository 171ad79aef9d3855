//! EtcdBackup controller
//!
//! Watches EtcdBackup resources, queues their keys and runs reconcile
//! workers until shutdown.

use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{reflector, watcher, WatchStreamExt},
    Api, Client,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::KubeBackupClient;
use crate::backup::BackupExecutor;
use crate::config::OperatorConfig;
use crate::controllers::Context;
use crate::crd::EtcdBackup;
use crate::error::Result;
use crate::metrics;
use crate::reconcilers::backup as backup_reconciler;

/// Run the EtcdBackup controller until `shutdown` fires
pub async fn run(
    client: Client,
    executor: Arc<BackupExecutor>,
    config: Arc<OperatorConfig>,
    shutdown: CancellationToken,
) {
    let api: Api<EtcdBackup> = match config.watch_namespace() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("EtcdBackup CRD not installed: {}", e);
        return;
    }

    info!(
        namespace = config.watch_namespace().unwrap_or("*"),
        workers = config.workers,
        "Starting EtcdBackup controller"
    );

    let (reader, writer) = reflector::store();
    let backup_client = Arc::new(KubeBackupClient::new(client, reader.clone()));
    let ctx = Arc::new(Context::new(backup_client, executor, config.clone()));

    let mut events = reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .touched_objects()
        .boxed();
    let feeder = {
        let queue = ctx.queue.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(backup) => queue.add(&backup.queue_key()),
                    Err(e) => warn!(error = %e, "EtcdBackup watch error"),
                }
            }
        })
    };

    tokio::select! {
        ready = reader.wait_until_ready() => {
            if let Err(e) = ready {
                error!(error = %e, "EtcdBackup cache never became ready");
                feeder.abort();
                return;
            }
        }
        _ = shutdown.cancelled() => {
            feeder.abort();
            return;
        }
    }
    metrics::OPERATOR_HEALTH.set(1.0);

    let workers: Vec<_> = (0..config.workers.max(1))
        .map(|_| tokio::spawn(run_worker(ctx.clone())))
        .collect();

    shutdown.cancelled().await;
    info!("Stopping EtcdBackup controller");

    ctx.queue.shut_down();
    feeder.abort();
    ctx.schedules.cancel_all();
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Reconcile worker panicked");
        }
    }
    metrics::OPERATOR_HEALTH.set(0.0);
}

/// Process keys until the queue shuts down
pub async fn run_worker(ctx: Arc<Context>) {
    while let Some(key) = ctx.queue.get().await {
        let result = backup_reconciler::process_item(&key, &ctx).await;
        handle_err(&ctx, &key, result);
        ctx.queue.done(&key);
    }
}

/// Apply the retry policy to the result of processing `key`
pub fn handle_err(ctx: &Context, key: &str, result: Result<()>) {
    let Err(e) = result else {
        ctx.queue.forget(key);
        return;
    };

    metrics::RECONCILIATION_ERRORS
        .with_label_values(&["EtcdBackup"])
        .inc();

    if ctx.queue.is_shutting_down() {
        debug!(key = %key, error = %e, "Queue shutting down, not requeueing");
        return;
    }

    let attempts = ctx.queue.num_requeues(key);
    if attempts < ctx.config.max_retries {
        warn!(key = %key, attempts, error = %e, "Error syncing EtcdBackup, requeueing");
        ctx.queue.add_rate_limited(key);
        return;
    }

    error!(key = %key, attempts, error = %e, "Dropping EtcdBackup out of the queue");
    ctx.queue.forget(key);
    metrics::QUEUE_DROPPED.with_label_values(&["EtcdBackup"]).inc();
}
