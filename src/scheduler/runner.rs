//! Periodic backup runner
//!
//! One task per scheduled resource. Each fire re-fetches the resource,
//! runs a backup against the fresh spec, writes status from the fresh
//! object, and retimes itself if the declared interval changed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::BackupClient;
use crate::backup::{report, run_backup, BackupExecutor};
use crate::config::OperatorConfig;
use crate::crd::EtcdBackup;
use crate::error::Error;
use crate::scheduler::{ScheduleHandle, ScheduleRegistry};

/// Delay before the first fire.
///
/// Aims at `anchor + interval`, where the anchor is the last execution, or
/// creation when the resource never ran. Falls back to the full interval
/// when that point is not in the future.
pub fn initial_delay(
    created: Option<DateTime<Utc>>,
    last_execution: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let Some(anchor) = last_execution.or(created) else {
        return interval;
    };
    let due = chrono::Duration::from_std(interval)
        .ok()
        .and_then(|step| anchor.checked_add_signed(step));
    let Some(due) = due else {
        return interval;
    };
    match (due - now).to_std() {
        Ok(delay) if !delay.is_zero() => delay,
        _ => interval,
    }
}

/// Longest wait a runner arms a timer for; later deadlines are clamped
pub const MAX_TIMER: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + wait`, clamped so the timer arithmetic cannot overflow
fn deadline(from: Instant, wait: Duration) -> Instant {
    from.checked_add(wait.min(MAX_TIMER)).unwrap_or(from)
}

/// Interval declared by a spec, `None` unless positive
fn declared_interval(backup: &EtcdBackup) -> Option<Duration> {
    match backup.spec.interval_secs() {
        secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
        _ => None,
    }
}

fn ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period.min(MAX_TIMER));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

enum Fetched {
    Latest(Box<EtcdBackup>),
    Gone,
    Cancelled,
    Failed(Error),
}

/// Background task firing backups for one resource
pub struct PeriodicRunner {
    client: Arc<dyn BackupClient>,
    executor: Arc<BackupExecutor>,
    registry: Arc<ScheduleRegistry>,
    namespace: String,
    name: String,
    uid: String,
    handle: ScheduleHandle,
    fetch_attempts: u32,
    fetch_delay: Duration,
}

impl PeriodicRunner {
    pub fn new(
        client: Arc<dyn BackupClient>,
        executor: Arc<BackupExecutor>,
        registry: Arc<ScheduleRegistry>,
        config: &OperatorConfig,
        backup: &EtcdBackup,
        handle: ScheduleHandle,
    ) -> Self {
        Self {
            client,
            executor,
            registry,
            namespace: backup.namespace().unwrap_or_default(),
            name: backup.name_any(),
            uid: backup.uid().unwrap_or_default(),
            handle,
            fetch_attempts: config.fetch_retry_attempts.max(1),
            fetch_delay: config.fetch_retry_delay(),
        }
    }

    pub fn spawn(self, initial: Duration, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(self.run(initial, interval))
    }

    /// Fire every `interval`, first after `initial`, until cancelled
    pub async fn run(self, initial: Duration, interval: Duration) {
        let token = self.handle.token().clone();
        let mut period = interval;
        let mut timer = ticker(deadline(Instant::now(), initial), period);

        info!(
            name = %self.name,
            namespace = %self.namespace,
            initial_secs = initial.as_secs(),
            interval_secs = period.as_secs(),
            "Periodic backup scheduled"
        );

        loop {
            let fired_at = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                at = timer.tick() => at,
            };
            if token.is_cancelled() {
                break;
            }

            let latest = match self.fetch_latest().await {
                Fetched::Latest(backup) => backup,
                Fetched::Cancelled => break,
                Fetched::Gone => {
                    info!(
                        name = %self.name,
                        namespace = %self.namespace,
                        "EtcdBackup gone, stopping periodic backup"
                    );
                    self.registry.release(&self.uid, &self.handle);
                    break;
                }
                Fetched::Failed(e) => {
                    warn!(
                        name = %self.name,
                        namespace = %self.namespace,
                        error = %e,
                        "Could not fetch EtcdBackup, skipping this backup"
                    );
                    continue;
                }
            };

            if latest.metadata.deletion_timestamp.is_some() {
                debug!(name = %self.name, "EtcdBackup is being deleted, skipping backup");
                continue;
            }

            // A resource that stopped being periodic is left to the one-shot path.
            let Some(declared) = declared_interval(&latest) else {
                info!(
                    name = %self.name,
                    namespace = %self.namespace,
                    "EtcdBackup is no longer periodic"
                );
                self.registry.release(&self.uid, &self.handle);
                break;
            };

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = run_backup(&self.executor, &latest, true) => result,
            };
            if token.is_cancelled() {
                break;
            }
            report(self.client.as_ref(), &latest, &result).await;

            if declared != period {
                info!(
                    name = %self.name,
                    namespace = %self.namespace,
                    old_secs = period.as_secs(),
                    new_secs = declared.as_secs(),
                    "Backup interval changed, retiming"
                );
                period = declared;
                timer = ticker(deadline(fired_at, period), period);
            }
        }

        debug!(name = %self.name, namespace = %self.namespace, "Periodic backup runner stopped");
    }

    async fn fetch_latest(&self) -> Fetched {
        let token = self.handle.token();
        let mut last_error = None;

        for attempt in 1..=self.fetch_attempts {
            match self.client.get(&self.namespace, &self.name).await {
                Ok(backup) if backup.uid().as_deref() == Some(self.uid.as_str()) => {
                    return Fetched::Latest(Box::new(backup));
                }
                // Same name, new object: ours was deleted.
                Ok(_) => return Fetched::Gone,
                Err(e) if e.is_not_found() => return Fetched::Gone,
                Err(e) => {
                    debug!(name = %self.name, attempt, error = %e, "Fetch failed, retrying");
                    last_error = Some(e);
                }
            }

            if attempt < self.fetch_attempts {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Fetched::Cancelled,
                    _ = tokio::time::sleep(self.fetch_delay) => {}
                }
            }
        }

        match last_error {
            Some(e) => Fetched::Failed(e),
            None => Fetched::Cancelled,
        }
    }
}
