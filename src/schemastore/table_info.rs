//! Time-versioned table schemas with dispatcher registration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{Receiver, Sender, bounded};
use thiserror::Error;
use tracing::warn;

use crate::core::{DdlJob, DispatcherId, SchemaVersion, TableId, TableInfo, Ts};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TableInfoError {
    #[error("no schema for ts {ts}: earliest version is {first_version}")]
    TooOld { ts: Ts, first_version: Ts },
    #[error("table {table_id} has no schema versions")]
    Empty { table_id: TableId },
}

/// One-shot open latch.
///
/// `wait` blocks until `set` drops the internal sender, at which point the
/// receiver disconnects and every waiter (current and future) falls through.
pub(crate) struct Latch {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    pub(crate) fn set(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn wait(&self) {
        // Nothing is ever sent; recv returns once the sender is dropped.
        let _ = self.receiver.recv();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

struct Inner {
    /// Ascending by version timestamp.
    versions: Vec<(Ts, Arc<TableInfo>)>,
    /// Registered dispatcher -> send timestamp.
    dispatchers: HashMap<DispatcherId, Ts>,
}

/// Append-mostly list of `(version, schema)` for one table, plus the
/// dispatchers reading from it.
pub struct VersionedTableInfoStore {
    table_id: TableId,
    initialized: Latch,
    inner: Mutex<Inner>,
}

impl VersionedTableInfoStore {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            initialized: Latch::new(),
            inner: Mutex::new(Inner {
                versions: Vec::new(),
                dispatchers: HashMap::new(),
            }),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Blocks until history rebuilding has finished.
    pub fn wait_initialized(&self) {
        self.initialized.wait();
    }

    pub fn set_initialized(&self) {
        self.initialized.set();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.is_set()
    }

    /// Idempotent by id: a re-registration keeps the original start ts.
    pub fn register_dispatcher(&self, id: DispatcherId, start_ts: Ts) {
        self.lock().dispatchers.entry(id).or_insert(start_ts);
    }

    /// Returns true iff the last dispatcher left; the caller may then drop
    /// the whole store.
    pub fn unregister_dispatcher(&self, id: DispatcherId) -> bool {
        let mut inner = self.lock();
        inner.dispatchers.remove(&id);
        inner.dispatchers.is_empty()
    }

    /// Monotone: only moves the send ts forward.
    pub fn update_dispatcher_send_ts(&self, id: DispatcherId, ts: Ts) {
        let mut inner = self.lock();
        match inner.dispatchers.get_mut(&id) {
            Some(current) if ts > *current => *current = ts,
            Some(_) => {}
            None => warn!(dispatcher = %id, "send ts update for unregistered dispatcher"),
        }
    }

    pub fn dispatcher_send_ts(&self, id: DispatcherId) -> Option<Ts> {
        self.lock().dispatchers.get(&id).copied()
    }

    /// Minimum send ts across registered dispatchers: the retention floor.
    pub fn min_send_ts(&self) -> Option<Ts> {
        self.lock().dispatchers.values().min().copied()
    }

    /// Append the schema produced by a finished DDL job.
    ///
    /// Must be called in ascending `finished_ts` order; replays of already
    /// applied versions are skipped.
    pub fn apply_ddl(&self, job: &DdlJob) {
        let version = job.binlog.finished_ts;
        let mut inner = self.lock();
        if let Some(&(last, _)) = inner.versions.last()
            && version <= last
        {
            warn!(
                table = %self.table_id,
                %version,
                %last,
                "skipping replayed schema version"
            );
            return;
        }
        let info = match (&job.binlog.table_info, inner.versions.last()) {
            (Some(info), _) => Arc::new(info.clone()),
            (None, Some((_, prev))) => {
                // Schema-only change (e.g. drop): carry the previous shape
                // forward under the new version.
                let mut info = (**prev).clone();
                info.schema_version = job.binlog.schema_version;
                Arc::new(info)
            }
            (None, None) => {
                warn!(table = %self.table_id, %version, "ddl without table info on empty store");
                return;
            }
        };
        inner.versions.push((version, info));
    }

    /// Append a renamed copy of the current schema, as produced by a
    /// rename-tables job.
    pub fn apply_rename(&self, new_name: &str, version: Ts, schema_version: SchemaVersion) {
        let mut inner = self.lock();
        if let Some(&(last, _)) = inner.versions.last()
            && version <= last
        {
            warn!(table = %self.table_id, %version, "skipping replayed rename");
            return;
        }
        let Some((_, prev)) = inner.versions.last() else {
            warn!(table = %self.table_id, %version, "rename on empty store");
            return;
        };
        let info = Arc::new(prev.renamed(new_name, schema_version));
        inner.versions.push((version, info));
    }

    /// Schema whose version is the largest `<= ts`.
    pub fn table_info(&self, ts: Ts) -> Result<Arc<TableInfo>, TableInfoError> {
        let inner = self.lock();
        if inner.versions.is_empty() {
            return Err(TableInfoError::Empty {
                table_id: self.table_id,
            });
        }
        let idx = inner.versions.partition_point(|&(v, _)| v <= ts);
        if idx == 0 {
            return Err(TableInfoError::TooOld {
                ts,
                first_version: inner.versions[0].0,
            });
        }
        Ok(Arc::clone(&inner.versions[idx - 1].1))
    }

    pub fn first_version(&self) -> Option<Ts> {
        self.lock().versions.first().map(|&(v, _)| v)
    }

    pub fn last_version(&self) -> Option<Ts> {
        self.lock().versions.last().map(|&(v, _)| v)
    }

    /// Append the versions of `other` newer than our tail.
    ///
    /// Used when an older-history store replaces the one in the registry:
    /// DDLs applied to the old store while ours was being rebuilt must not
    /// be lost.
    pub fn check_and_copy_tail_from(&self, other: &VersionedTableInfoStore) {
        let mut inner = self.lock();
        let other_inner = other.lock();
        let last = inner.versions.last().map(|&(v, _)| v);
        for (version, info) in &other_inner.versions {
            if last.is_none_or(|l| *version > l) {
                inner.versions.push((*version, Arc::clone(info)));
            }
        }
    }

    /// Carry dispatchers over from a replaced store.
    pub fn copy_registered_dispatchers(&self, other: &VersionedTableInfoStore) {
        let mut inner = self.lock();
        let other_inner = other.lock();
        for (id, ts) in &other_inner.dispatchers {
            inner.dispatchers.entry(*id).or_insert(*ts);
        }
    }

    /// Elide versions strictly older than the one covering `floor`.
    pub fn gc(&self, floor: Ts) {
        let mut inner = self.lock();
        let idx = inner.versions.partition_point(|&(v, _)| v <= floor);
        if idx > 1 {
            inner.versions.drain(..idx - 1);
        }
    }

    pub fn version_count(&self) -> usize {
        self.lock().versions.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BinlogInfo, ColumnInfo, DatabaseId, DdlJobType};

    fn table_info(name: &str, version: i64) -> TableInfo {
        TableInfo {
            id: TableId::new(1),
            name: name.to_string(),
            schema_version: SchemaVersion::new(version),
            columns: vec![ColumnInfo {
                id: 1,
                name: "id".to_string(),
                column_type: "bigint".to_string(),
            }],
        }
    }

    fn job(finished_ts: u64, version: i64, info: Option<TableInfo>) -> DdlJob {
        DdlJob {
            job_type: DdlJobType::AddColumn,
            schema_id: DatabaseId::new(1),
            table_id: TableId::new(1),
            schema_name: String::new(),
            version: SchemaVersion::new(version),
            binlog: BinlogInfo {
                finished_ts: Ts::new(finished_ts),
                schema_version: SchemaVersion::new(version),
                table_info: info,
            },
            args: serde_json::Value::Null,
        }
    }

    #[test]
    fn point_in_time_lookup() {
        let store = VersionedTableInfoStore::new(TableId::new(1));
        store.apply_ddl(&job(30, 1, Some(table_info("a", 1))));
        store.apply_ddl(&job(60, 2, Some(table_info("b", 2))));
        store.apply_ddl(&job(100, 3, Some(table_info("c", 3))));

        assert_eq!(store.table_info(Ts::new(30)).unwrap().name, "a");
        assert_eq!(store.table_info(Ts::new(59)).unwrap().name, "a");
        assert_eq!(store.table_info(Ts::new(60)).unwrap().name, "b");
        assert_eq!(store.table_info(Ts::new(500)).unwrap().name, "c");
        assert_eq!(
            store.table_info(Ts::new(29)),
            Err(TableInfoError::TooOld {
                ts: Ts::new(29),
                first_version: Ts::new(30),
            })
        );
    }

    #[test]
    fn empty_store_has_no_info() {
        let store = VersionedTableInfoStore::new(TableId::new(9));
        assert_eq!(
            store.table_info(Ts::new(1)),
            Err(TableInfoError::Empty {
                table_id: TableId::new(9),
            })
        );
    }

    #[test]
    fn replayed_versions_are_skipped() {
        let store = VersionedTableInfoStore::new(TableId::new(1));
        store.apply_ddl(&job(50, 1, Some(table_info("a", 1))));
        store.apply_ddl(&job(50, 1, Some(table_info("dup", 1))));
        store.apply_ddl(&job(40, 1, Some(table_info("older", 1))));
        assert_eq!(store.version_count(), 1);
        assert_eq!(store.table_info(Ts::new(50)).unwrap().name, "a");
    }

    #[test]
    fn schema_only_change_carries_shape_forward() {
        let store = VersionedTableInfoStore::new(TableId::new(1));
        store.apply_ddl(&job(10, 1, Some(table_info("a", 1))));
        store.apply_ddl(&job(20, 2, None));
        let info = store.table_info(Ts::new(20)).unwrap();
        assert_eq!(info.name, "a");
        assert_eq!(info.schema_version, SchemaVersion::new(2));
    }

    #[test]
    fn dispatcher_lifecycle_and_retention_floor() {
        let store = VersionedTableInfoStore::new(TableId::new(1));
        let d1 = DispatcherId::random();
        let d2 = DispatcherId::random();
        store.register_dispatcher(d1, Ts::new(100));
        store.register_dispatcher(d2, Ts::new(50));
        assert_eq!(store.min_send_ts(), Some(Ts::new(50)));

        store.update_dispatcher_send_ts(d2, Ts::new(80));
        assert_eq!(store.min_send_ts(), Some(Ts::new(80)));
        // Monotone: moving backwards is a no-op.
        store.update_dispatcher_send_ts(d2, Ts::new(60));
        assert_eq!(store.dispatcher_send_ts(d2), Some(Ts::new(80)));

        assert!(!store.unregister_dispatcher(d1));
        assert!(store.unregister_dispatcher(d2));
    }

    #[test]
    fn copy_tail_merges_newer_versions() {
        let old = VersionedTableInfoStore::new(TableId::new(1));
        old.apply_ddl(&job(60, 2, Some(table_info("b", 2))));
        old.apply_ddl(&job(100, 3, Some(table_info("c", 3))));

        let new = VersionedTableInfoStore::new(TableId::new(1));
        new.apply_ddl(&job(30, 1, Some(table_info("a", 1))));
        new.apply_ddl(&job(60, 2, Some(table_info("b", 2))));
        new.check_and_copy_tail_from(&old);

        assert_eq!(new.version_count(), 3);
        assert_eq!(new.first_version(), Some(Ts::new(30)));
        assert_eq!(new.last_version(), Some(Ts::new(100)));
    }

    #[test]
    fn gc_keeps_the_version_covering_the_floor() {
        let store = VersionedTableInfoStore::new(TableId::new(1));
        store.apply_ddl(&job(30, 1, Some(table_info("a", 1))));
        store.apply_ddl(&job(60, 2, Some(table_info("b", 2))));
        store.apply_ddl(&job(100, 3, Some(table_info("c", 3))));

        store.gc(Ts::new(70));
        assert_eq!(store.first_version(), Some(Ts::new(60)));
        assert_eq!(store.table_info(Ts::new(70)).unwrap().name, "b");
    }

    #[test]
    fn latch_opens_for_current_and_future_waiters() {
        let store = Arc::new(VersionedTableInfoStore::new(TableId::new(1)));
        assert!(!store.is_initialized());

        let waiter = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.wait_initialized())
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        store.set_initialized();
        waiter.join().unwrap();

        assert!(store.is_initialized());
        store.wait_initialized();
    }
}
