//! In-memory buffer of DDL events not yet covered by a resolved timestamp.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::{DdlEvent, Ts};

/// Thread-safe ordered buffer of unresolved DDL events, keyed by commit
/// timestamp.
#[derive(Default)]
pub struct UnsortedDdlCache {
    events: Mutex<BTreeMap<Ts, DdlEvent>>,
}

impl UnsortedDdlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event.
    ///
    /// # Panics
    ///
    /// Commit timestamps are unique per DDL job upstream; a collision means
    /// the feed is corrupt and the process must not continue on it.
    pub fn add(&self, event: DdlEvent) {
        let mut events = self.lock();
        if let Some(existing) = events.get(&event.commit_ts) {
            panic!(
                "commit ts collision at {}: existing job {:?}, new job {:?}",
                event.commit_ts, existing.job.job_type, event.job.job_type
            );
        }
        events.insert(event.commit_ts, event);
    }

    /// Atomically remove and return all events with `commit_ts <= ts`,
    /// ascending.
    pub fn fetch_before(&self, ts: Ts) -> Vec<DdlEvent> {
        let mut events = self.lock();
        if ts == Ts::MAX {
            return std::mem::take(&mut *events).into_values().collect();
        }
        let retained = events.split_off(&ts.next());
        let drained = std::mem::replace(&mut *events, retained);
        drained.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Ts, DdlEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
