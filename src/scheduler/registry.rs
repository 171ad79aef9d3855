//! Registry of live periodic schedules, keyed by resource UID

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::crd::EtcdBackupSpec;
use crate::metrics;

/// Identity and cancellation of one scheduled runner.
///
/// Cancelling more than once is a no-op.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    id: u64,
    token: CancellationToken,
}

impl ScheduleHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
struct ScheduleEntry {
    spec: EtcdBackupSpec,
    handle: ScheduleHandle,
}

/// At most one live entry per UID.
///
/// Every operation is a single atomic map access; no lock is held by
/// callers.
#[derive(Debug, Default)]
pub struct ScheduleRegistry {
    entries: DashMap<String, ScheduleEntry>,
    next_id: AtomicU64,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no entry exists for `uid` or it was started from another spec
    pub fn needs_schedule(&self, uid: &str, spec: &EtcdBackupSpec) -> bool {
        self.entries
            .get(uid)
            .map(|entry| entry.spec != *spec)
            .unwrap_or(true)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.contains_key(uid)
    }

    /// Spec the current entry for `uid` was started from
    pub fn spec(&self, uid: &str) -> Option<EtcdBackupSpec> {
        self.entries.get(uid).map(|entry| entry.spec.clone())
    }

    /// Cancel any entry for `uid` and record a new one in its place.
    ///
    /// The returned handle is what the new runner must observe.
    pub fn replace(&self, uid: &str, spec: EtcdBackupSpec) -> ScheduleHandle {
        let handle = ScheduleHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };
        let entry = ScheduleEntry {
            spec,
            handle: handle.clone(),
        };

        match self.entries.entry(uid.to_string()) {
            Entry::Occupied(mut occupied) => {
                debug!(
                    uid = %uid,
                    old = occupied.get().handle.id,
                    new = handle.id,
                    "Replacing schedule"
                );
                occupied.get().handle.token.cancel();
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                debug!(uid = %uid, id = handle.id, "Adding schedule");
                vacant.insert(entry);
            }
        }

        self.update_gauge();
        handle
    }

    /// Cancel and drop the entry for `uid`. Returns whether one existed.
    pub fn remove(&self, uid: &str) -> bool {
        let removed = self.entries.remove(uid);
        if let Some((_, entry)) = &removed {
            entry.handle.token.cancel();
            debug!(uid = %uid, id = entry.handle.id, "Removed schedule");
        }
        self.update_gauge();
        removed.is_some()
    }

    /// Drop the entry for `uid` only if it still belongs to `handle`.
    ///
    /// Used by a runner that stops on its own, so it never removes the entry
    /// of a runner that replaced it.
    pub fn release(&self, uid: &str, handle: &ScheduleHandle) -> bool {
        handle.token.cancel();
        let released = self
            .entries
            .remove_if(uid, |_, entry| entry.handle.id == handle.id)
            .is_some();
        self.update_gauge();
        released
    }

    /// Cancel every runner, on shutdown
    pub fn cancel_all(&self) {
        for entry in self.entries.iter() {
            entry.handle.token.cancel();
        }
        self.entries.clear();
        self.update_gauge();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update_gauge(&self) {
        metrics::ACTIVE_SCHEDULES.set(self.entries.len() as f64);
    }
}
