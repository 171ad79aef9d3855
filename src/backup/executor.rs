//! Backup execution: validate, snapshot, upload, prune

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::backup::manager::BackupManager;
use crate::backup::snapshot::{SnapshotRequest, Snapshotter};
use crate::backup::target::StorageTarget;
use crate::config::OperatorConfig;
use crate::crd::EtcdBackupSpec;
use crate::error::{Error, Result};
use crate::storage::StorageProvider;

/// Status fields produced by a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct BackupOutcome {
    pub etcd_revision: i64,
    pub etcd_version: String,
    pub last_success_date: DateTime<Utc>,
}

/// Reject specs that cannot run, before any I/O
pub fn validate(spec: &EtcdBackupSpec) -> Result<()> {
    if spec.etcd_endpoints.is_empty() {
        return Err(Error::validation("spec.etcdEndpoints should not be empty"));
    }

    if let Some(policy) = &spec.backup_policy {
        if policy.backup_interval_in_second < 0 {
            return Err(Error::validation(
                "spec.backupPolicy.backupIntervalInSecond should not be lower than 0",
            ));
        }
        if policy.max_backups < 0 {
            return Err(Error::validation(
                "spec.backupPolicy.maxBackups should not be lower than 0",
            ));
        }
    }

    Ok(())
}

/// Policy timeout when positive, `default` otherwise
pub fn effective_timeout(spec: &EtcdBackupSpec, default: Duration) -> Duration {
    match &spec.backup_policy {
        Some(policy) if policy.timeout_in_second > 0 => {
            Duration::from_secs(policy.timeout_in_second as u64)
        }
        _ => default,
    }
}

/// Retention bound, `None` when unbounded
pub fn effective_max_backups(spec: &EtcdBackupSpec) -> Option<usize> {
    match &spec.backup_policy {
        Some(policy) if policy.max_backups > 0 => Some(policy.max_backups as usize),
        _ => None,
    }
}

/// Runs one backup of an etcd cluster to its declared storage
pub struct BackupExecutor {
    snapshotter: Arc<dyn Snapshotter>,
    storage: Arc<dyn StorageProvider>,
    default_timeout: Duration,
}

impl BackupExecutor {
    pub fn new(
        snapshotter: Arc<dyn Snapshotter>,
        storage: Arc<dyn StorageProvider>,
        config: &OperatorConfig,
    ) -> Self {
        Self {
            snapshotter,
            storage,
            default_timeout: config.default_backup_timeout(),
        }
    }

    /// Validate `spec` and run the backup under its deadline
    pub async fn execute(
        &self,
        spec: &EtcdBackupSpec,
        namespace: &str,
        is_periodic: bool,
    ) -> Result<BackupOutcome> {
        validate(spec)?;
        let target = StorageTarget::from_spec(spec)?;
        let timeout = effective_timeout(spec, self.default_timeout);
        let max_backups = effective_max_backups(spec);

        let request = SnapshotRequest {
            endpoints: spec.etcd_endpoints.clone(),
            client_tls_secret: spec.client_tls_secret.clone(),
            allow_self_signed: spec.allow_self_signed_certificates,
            namespace: namespace.to_string(),
        };

        debug!(
            storage_type = target.storage_type(),
            path = target.path(),
            timeout_secs = timeout.as_secs(),
            "Executing backup"
        );

        // Dropping the run future on expiry abandons any uncommitted upload.
        tokio::time::timeout(
            timeout,
            self.run(&target, &request, is_periodic, max_backups),
        )
        .await
        .map_err(|_| Error::Timeout(timeout.as_secs()))?
    }

    async fn run(
        &self,
        target: &StorageTarget,
        request: &SnapshotRequest,
        is_periodic: bool,
        max_backups: Option<usize>,
    ) -> Result<BackupOutcome> {
        let backend = self.storage.backend(target, &request.namespace).await?;
        let manager = BackupManager::new(backend);

        let snapshot = self.snapshotter.snapshot(request).await?;
        let now = Utc::now();
        let (path, _) = manager
            .save_snapshot(target.path(), &snapshot, is_periodic, now)
            .await?;

        if let Some(max) = max_backups {
            manager.ensure_max_backups(target.path(), max).await?;
        }

        info!(
            path = %path,
            revision = snapshot.revision,
            version = %snapshot.version,
            "Backup completed"
        );
        Ok(BackupOutcome {
            etcd_revision: snapshot.revision,
            etcd_version: snapshot.version,
            last_success_date: now,
        })
    }
}
