//! Persisting backup outcomes onto the resource status

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::adapters::BackupClient;
use crate::backup::executor::{BackupExecutor, BackupOutcome};
use crate::crd::{EtcdBackup, EtcdBackupStatus};
use crate::error::Result;
use crate::metrics;

/// Fold an execution result into `status`.
///
/// Failures keep the previous success fields.
pub fn apply_outcome(
    status: &mut EtcdBackupStatus,
    result: &Result<BackupOutcome>,
    now: DateTime<Utc>,
) {
    match result {
        Ok(outcome) => {
            status.succeeded = true;
            status.reason.clear();
            status.etcd_revision = outcome.etcd_revision;
            status.etcd_version = outcome.etcd_version.clone();
            status.last_success_date = Some(outcome.last_success_date);
            status.last_execution_date = Some(outcome.last_success_date);
        }
        Err(e) => {
            status.succeeded = false;
            status.reason = e.to_string();
            status.last_execution_date = Some(now);
        }
    }
}

/// Write the outcome to the status subresource and record metrics.
///
/// A failed status write is only logged; the next reconcile or tick
/// reports again.
pub async fn report(client: &dyn BackupClient, backup: &EtcdBackup, result: &Result<BackupOutcome>) {
    let namespace = backup.namespace().unwrap_or_default();
    let name = backup.name_any();

    let mut updated = backup.clone();
    apply_outcome(
        updated.status.get_or_insert_with(Default::default),
        result,
        Utc::now(),
    );

    if let Ok(outcome) = result {
        metrics::record_success(&namespace, &name, outcome.last_success_date.timestamp());
    }

    match client.update_status(&updated).await {
        Ok(_) => {}
        Err(e) if e.is_conflict() => debug!(
            name = %name,
            namespace = %namespace,
            "EtcdBackup changed while backing up, status not written"
        ),
        Err(e) => warn!(
            name = %name,
            namespace = %namespace,
            error = %e,
            "Failed to update EtcdBackup status"
        ),
    }
}

/// Run one backup of `backup`, recording attempt metrics and logging the result
pub async fn run_backup(
    executor: &BackupExecutor,
    backup: &EtcdBackup,
    is_periodic: bool,
) -> Result<BackupOutcome> {
    let namespace = backup.namespace().unwrap_or_default();
    let name = backup.name_any();

    metrics::record_attempt(&namespace, &name);
    let timer = metrics::BACKUP_DURATION
        .with_label_values(&[namespace.as_str(), name.as_str()])
        .start_timer();
    let result = executor.execute(&backup.spec, &namespace, is_periodic).await;
    timer.observe_duration();

    match &result {
        Ok(outcome) => info!(
            name = %name,
            namespace = %namespace,
            revision = outcome.etcd_revision,
            "Backup succeeded"
        ),
        Err(e) => warn!(name = %name, namespace = %namespace, error = %e, "Backup failed"),
    }
    result
}

/// [`run_backup`] followed by [`report`].
///
/// Returns the execution error, if any, after the status write.
pub async fn execute_and_report(
    executor: &BackupExecutor,
    client: &dyn BackupClient,
    backup: &EtcdBackup,
    is_periodic: bool,
) -> Result<()> {
    let result = run_backup(executor, backup, is_periodic).await;
    report(client, backup, &result).await;
    result.map(|_| ())
}
