//! Kubernetes controller for EtcdBackup resources
//!
//! Watch events feed a work queue; workers hand keys to the reconciler.

mod backup_controller;

pub use backup_controller::{handle_err, run as run_backup_controller, run_worker};

use std::sync::Arc;

use crate::adapters::BackupClient;
use crate::backup::BackupExecutor;
use crate::config::OperatorConfig;
use crate::queue::WorkQueue;
use crate::scheduler::ScheduleRegistry;

/// State shared by workers, the reconciler and periodic runners
pub struct Context {
    /// Cache reads and API writes for EtcdBackup
    pub client: Arc<dyn BackupClient>,
    pub executor: Arc<BackupExecutor>,
    pub schedules: Arc<ScheduleRegistry>,
    pub queue: Arc<WorkQueue>,
    pub config: Arc<OperatorConfig>,
}

impl Context {
    /// Create a new context with an empty queue and registry
    pub fn new(
        client: Arc<dyn BackupClient>,
        executor: Arc<BackupExecutor>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            client,
            executor,
            schedules: Arc::new(ScheduleRegistry::new()),
            queue: Arc::new(WorkQueue::from_config(&config)),
            config,
        }
    }
}
