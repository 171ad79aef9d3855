//! Saving snapshots and enforcing retention

use std::io::Cursor;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::backup::snapshot::Snapshot;
use crate::error::Result;
use crate::storage::StorageBackend;

/// Path of a periodic backup: `{base}_v{revision}_{YYYY-MM-DD-HH:MM:SS}`.
///
/// Names under the same base sort lexically by time.
pub fn periodic_path(base: &str, revision: i64, at: DateTime<Utc>) -> String {
    format!("{}_v{}_{}", base, revision, at.format("%Y-%m-%d-%H:%M:%S"))
}

fn backup_time(path: &str) -> &str {
    path.rsplit_once('_').map(|(_, at)| at).unwrap_or("")
}

/// Writes snapshots to one backend
pub struct BackupManager {
    backend: StorageBackend,
}

impl BackupManager {
    pub fn new(backend: StorageBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    /// Upload a snapshot; returns the path written and its size
    pub async fn save_snapshot(
        &self,
        base_path: &str,
        snapshot: &Snapshot,
        is_periodic: bool,
        now: DateTime<Utc>,
    ) -> Result<(String, u64)> {
        let path = if is_periodic {
            periodic_path(base_path, snapshot.revision, now)
        } else {
            base_path.to_string()
        };

        let mut reader = Cursor::new(snapshot.data.clone());
        let size = self.backend.write(&path, &mut reader).await?;

        info!(
            backend = self.backend.kind(),
            path = %path,
            size,
            revision = snapshot.revision,
            "Saved etcd snapshot"
        );
        Ok((path, size))
    }

    /// Keep only the newest `max_backups` entries under `base_path`.
    ///
    /// Returns how many were deleted.
    pub async fn ensure_max_backups(&self, base_path: &str, max_backups: usize) -> Result<usize> {
        let mut paths = self.backend.list(base_path).await?;
        if paths.len() <= max_backups {
            return Ok(0);
        }

        // Timestamp suffix first: revisions of different widths don't sort lexically.
        paths.sort_unstable_by(|a, b| (backup_time(b), b).cmp(&(backup_time(a), a)));
        let stale = paths.split_off(max_backups);
        for path in &stale {
            debug!(path = %path, "Deleting backup beyond retention");
            self.backend.delete(path).await?;
        }

        info!(
            base_path = %base_path,
            deleted = stale.len(),
            kept = paths.len(),
            "Enforced backup retention"
        );
        Ok(stale.len())
    }
}
