//! Backup execution pipeline
//!
//! A run validates the spec, resolves its [`StorageTarget`], takes a
//! snapshot through a [`Snapshotter`], uploads it and prunes old backups,
//! all under one deadline. [`report`] writes the outcome back.

mod executor;
mod manager;
mod snapshot;
mod status;
mod target;

pub use executor::{effective_max_backups, effective_timeout, validate, BackupExecutor, BackupOutcome};
pub use manager::{periodic_path, BackupManager};
pub use snapshot::{
    decode_snapshot_stream, endpoint_url, parse_status, EtcdGatewaySnapshotter, Snapshot,
    SnapshotRequest, Snapshotter,
};
pub use status::{apply_outcome, execute_and_report, report, run_backup};
pub use target::StorageTarget;
