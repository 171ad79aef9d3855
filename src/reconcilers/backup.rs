//! EtcdBackup reconciler
//!
//! Decides, for one queue key, between:
//! - deletion handling (stop the schedule, release the finalizer)
//! - (re)scheduling a periodic backup
//! - running a one-shot backup
//! - nothing, when a one-shot backup already ran

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::backup::execute_and_report;
use crate::controllers::Context;
use crate::crd::EtcdBackup;
use crate::error::Result;
use crate::metrics;
use crate::scheduler::{initial_delay, PeriodicRunner};

/// Finalizer guarding periodic backups until their runner is stopped
pub const FINALIZER_NAME: &str = "backup-operator-periodic";

fn has_finalizer(backup: &EtcdBackup) -> bool {
    backup.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

/// Reconcile the EtcdBackup stored under `key`
#[instrument(skip(ctx), fields(key = %key))]
pub async fn process_item(key: &str, ctx: &Context) -> Result<()> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["EtcdBackup"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["EtcdBackup"]).inc();

    let Some(backup) = ctx.client.get_by_key(key) else {
        debug!("EtcdBackup not in cache, already deleted");
        return Ok(());
    };
    let uid = backup.uid().unwrap_or_default();

    if backup.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&backup, &uid, ctx).await;
    }

    if backup.spec.is_periodic() {
        if ctx.schedules.needs_schedule(&uid, &backup.spec) {
            return schedule(&backup, &uid, ctx).await;
        }
        debug!("Periodic backup already scheduled with this spec");
        return Ok(());
    }

    if ctx.schedules.remove(&uid) {
        info!(uid = %uid, "EtcdBackup is no longer periodic, stopped its schedule");
    }

    if backup.has_terminal_status() {
        debug!("One-shot backup already ran");
        return Ok(());
    }

    execute_and_report(&ctx.executor, ctx.client.as_ref(), &backup, false).await
}

/// Stop any schedule, then let the deletion proceed
async fn handle_deletion(backup: &EtcdBackup, uid: &str, ctx: &Context) -> Result<()> {
    if ctx.schedules.remove(uid) {
        info!(uid = %uid, "Stopped periodic backup of deleted EtcdBackup");
    }

    if !has_finalizer(backup) {
        return Ok(());
    }

    let mut updated = backup.clone();
    updated.finalizers_mut().retain(|f| f != FINALIZER_NAME);
    match ctx.client.update(&updated).await {
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
        Ok(_) => {
            info!("Removed finalizer from EtcdBackup");
            Ok(())
        }
    }
}

/// Replace any runner for `uid` with one started from the current spec
async fn schedule(backup: &Arc<EtcdBackup>, uid: &str, ctx: &Context) -> Result<()> {
    let mut current = EtcdBackup::clone(backup);
    if !has_finalizer(&current) {
        current.finalizers_mut().push(FINALIZER_NAME.to_string());
        current = ctx.client.update(&current).await?;
    }

    let interval = Duration::from_secs(backup.spec.interval_secs() as u64);
    let created = backup.metadata.creation_timestamp.as_ref().map(|t| t.0);
    let last_execution = backup.status.as_ref().and_then(|s| s.last_execution_date);
    let initial = initial_delay(created, last_execution, interval, Utc::now());

    let handle = ctx.schedules.replace(uid, backup.spec.clone());
    PeriodicRunner::new(
        ctx.client.clone(),
        ctx.executor.clone(),
        ctx.schedules.clone(),
        &ctx.config,
        &current,
        handle,
    )
    .spawn(initial, interval);

    info!(
        uid = %uid,
        interval_secs = interval.as_secs(),
        first_in_secs = initial.as_secs(),
        "Scheduled periodic backup"
    );
    Ok(())
}
