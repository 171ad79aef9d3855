//! Operator configuration
//!
//! Parsed once at process start and handed to the queue, reconciler,
//! periodic runners and executor. Nothing in the core reads the
//! environment directly.

use std::time::Duration;

use clap::Parser;

/// Default deadline for a single backup run
pub const DEFAULT_BACKUP_TIMEOUT_SECS: u64 = 60;

/// Azure block blobs are staged in chunks of this size
pub const DEFAULT_ABS_BLOCK_SIZE: usize = 100 * 1024 * 1024;

/// Runtime configuration for the etcd backup operator
#[derive(Parser, Debug, Clone)]
#[command(name = "etcd-backup-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Namespace to watch (ignored with --cluster-wide)
    #[arg(long, env = "MY_POD_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Watch EtcdBackup resources in all namespaces
    #[arg(long, env = "CLUSTER_WIDE", default_value_t = false)]
    pub cluster_wide: bool,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Port for the metrics and health server
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Backup deadline used when the policy sets none
    #[arg(long, env = "DEFAULT_BACKUP_TIMEOUT_SECS", default_value_t = DEFAULT_BACKUP_TIMEOUT_SECS)]
    pub default_backup_timeout_secs: u64,

    /// Failures after which a key is dropped from the queue
    #[arg(long, env = "MAX_RETRIES", default_value_t = 15)]
    pub max_retries: u32,

    /// First requeue delay; doubled on every consecutive failure
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value_t = 5)]
    pub retry_base_delay_ms: u64,

    /// Upper bound for the requeue delay
    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value_t = 1000)]
    pub retry_max_delay_secs: u64,

    /// Attempts to re-fetch a resource on each periodic tick
    #[arg(long, env = "FETCH_RETRY_ATTEMPTS", default_value_t = 5)]
    pub fetch_retry_attempts: u32,

    /// Delay between re-fetch attempts
    #[arg(long, env = "FETCH_RETRY_DELAY_MS", default_value_t = 1000)]
    pub fetch_retry_delay_ms: u64,

    /// Chunk size for staged block uploads
    #[arg(long, env = "ABS_BLOCK_SIZE", default_value_t = DEFAULT_ABS_BLOCK_SIZE)]
    pub abs_block_size: usize,
}

impl OperatorConfig {
    pub fn default_backup_timeout(&self) -> Duration {
        Duration::from_secs(self.default_backup_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    /// Namespace to scope the watch to, `None` for cluster-wide
    pub fn watch_namespace(&self) -> Option<&str> {
        if self.cluster_wide {
            None
        } else {
            Some(&self.namespace)
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            cluster_wide: false,
            workers: 1,
            metrics_port: 8080,
            default_backup_timeout_secs: DEFAULT_BACKUP_TIMEOUT_SECS,
            max_retries: 15,
            retry_base_delay_ms: 5,
            retry_max_delay_secs: 1000,
            fetch_retry_attempts: 5,
            fetch_retry_delay_ms: 1000,
            abs_block_size: DEFAULT_ABS_BLOCK_SIZE,
        }
    }
}
