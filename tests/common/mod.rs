//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use etcd_backup_operator::adapters::BackupClient;
use etcd_backup_operator::backup::{BackupExecutor, Snapshot, SnapshotRequest, Snapshotter};
use etcd_backup_operator::config::OperatorConfig;
use etcd_backup_operator::controllers::Context;
use etcd_backup_operator::crd::{
    BackupPolicy, EtcdBackup, EtcdBackupSpec, EtcdBackupStatus, S3BackupSource,
};
use etcd_backup_operator::storage::MemoryStorageProvider;
use etcd_backup_operator::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use parking_lot::Mutex;

// ============================================================================
// Resource client
// ============================================================================

/// In-memory stand-in for the watch cache and the EtcdBackup API
#[derive(Default)]
pub struct FakeBackupClient {
    objects: Mutex<BTreeMap<String, EtcdBackup>>,
    updates: AtomicUsize,
    status_updates: AtomicUsize,
    failing_gets: AtomicU32,
    fail_updates: AtomicBool,
}

fn key_of(backup: &EtcdBackup) -> String {
    backup.queue_key()
}

impl FakeBackupClient {
    pub fn insert(&self, backup: EtcdBackup) {
        self.objects.lock().insert(key_of(&backup), backup);
    }

    pub fn object(&self, key: &str) -> Option<EtcdBackup> {
        self.objects.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().remove(key);
    }

    /// Edit the stored object in place, like `kubectl edit`
    pub fn edit(&self, key: &str, f: impl FnOnce(&mut EtcdBackup)) {
        if let Some(backup) = self.objects.lock().get_mut(key) {
            f(backup);
        }
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn status_updates(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }

    /// Make the next `n` API reads fail with a transient error
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackupClient for FakeBackupClient {
    fn get_by_key(&self, key: &str) -> Option<Arc<EtcdBackup>> {
        self.object(key).map(Arc::new)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<EtcdBackup> {
        let remaining = self.failing_gets.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_gets.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.object(&format!("{}/{}", namespace, name))
            .ok_or_else(|| Error::NotFound(format!("{}/{}", namespace, name)))
    }

    async fn update(&self, backup: &EtcdBackup) -> Result<EtcdBackup> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::storage("the object has been modified"));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);

        let key = key_of(backup);
        let mut objects = self.objects.lock();
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.clone()))?;

        let mut updated = backup.clone();
        updated.status = stored.status;

        // Deletion completes once the last finalizer is gone.
        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, backup: &EtcdBackup) -> Result<EtcdBackup> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::storage("the object has been modified"));
        }
        self.status_updates.fetch_add(1, Ordering::SeqCst);

        let key = key_of(backup);
        let mut objects = self.objects.lock();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        stored.status = backup.status.clone();
        Ok(stored.clone())
    }
}

// ============================================================================
// Snapshotter
// ============================================================================

/// Snapshotter returning a small payload with an increasing revision
pub struct FakeSnapshotter {
    calls: AtomicUsize,
    revision: AtomicI64,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl Default for FakeSnapshotter {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            revision: AtomicI64::new(100),
            fail: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }
}

impl FakeSnapshotter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block every snapshot for `delay`
    pub fn stall(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl Snapshotter for FakeSnapshotter {
    async fn snapshot(&self, _request: &SnapshotRequest) -> Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::snapshot("etcd unavailable"));
        }
        Ok(Snapshot {
            revision: self.revision.fetch_add(1, Ordering::SeqCst),
            version: "3.5.9".to_string(),
            data: Bytes::from_static(b"etcd-snapshot"),
        })
    }
}

// ============================================================================
// Builders
// ============================================================================

pub const NAMESPACE: &str = "default";
pub const BUCKET: &str = "backups";

pub fn s3_spec(path: &str, policy: Option<BackupPolicy>) -> EtcdBackupSpec {
    EtcdBackupSpec {
        etcd_endpoints: vec!["http://etcd-0:2379".to_string()],
        storage_type: "S3".to_string(),
        backup_policy: policy,
        s3: Some(S3BackupSource {
            path: path.to_string(),
            aws_secret: "aws".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn periodic_policy(interval_secs: i64, max_backups: i32) -> Option<BackupPolicy> {
    Some(BackupPolicy {
        backup_interval_in_second: interval_secs,
        max_backups,
        ..Default::default()
    })
}

pub fn backup(name: &str, spec: EtcdBackupSpec, created: DateTime<Utc>) -> EtcdBackup {
    EtcdBackup {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", name)),
            creation_timestamp: Some(Time(created)),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

pub fn with_status(mut backup: EtcdBackup, status: EtcdBackupStatus) -> EtcdBackup {
    backup.status = Some(status);
    backup
}

pub fn key(name: &str) -> String {
    format!("{}/{}", NAMESPACE, name)
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub client: Arc<FakeBackupClient>,
    pub snapshotter: Arc<FakeSnapshotter>,
    pub storage: MemoryStorageProvider,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig::default())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let client = Arc::new(FakeBackupClient::default());
        let snapshotter = Arc::new(FakeSnapshotter::default());
        let storage = MemoryStorageProvider::default();
        let executor = Arc::new(BackupExecutor::new(
            snapshotter.clone(),
            Arc::new(storage.clone()),
            &config,
        ));
        let ctx = Arc::new(Context::new(client.clone(), executor, Arc::new(config)));
        Self {
            client,
            snapshotter,
            storage,
            ctx,
        }
    }

    /// Stored object keys under the test bucket
    pub fn stored(&self) -> Vec<String> {
        self.storage.objects.keys(BUCKET)
    }

    pub fn status(&self, name: &str) -> Option<EtcdBackupStatus> {
        self.client.object(&key(name)).and_then(|b| b.status)
    }
}
