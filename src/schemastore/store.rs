//! Schema store orchestrator.
//!
//! Owns the unsorted cache, the persistent log, the database map, and the
//! per-table versioned stores. One mutex guards the catalog state; replay
//! and persistent writes happen outside it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::{
    DatabaseId, DatabaseInfoMap, DdlEvent, DdlJob, DdlJobType, DispatcherId, RenameTablesArgs,
    SchemaVersion, TableId, TableInfo, Ts,
};

use super::cache::UnsortedDdlCache;
use super::snapshot::{SnapshotMeta, is_system_database};
use super::storage::{PersistentStorage, apply_job_to_catalog};
use super::table_info::VersionedTableInfoStore;
use super::{SchemaStoreError, SchemaStoreResult};

/// Input of the event-drain loop.
pub enum StoreEvent {
    Ddl(DdlEvent),
    ResolvedTs(Ts),
}

/// Cancellation token shared by the drain loop and the DDL-job fetcher.
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct DispatcherInfo {
    table_id: TableId,
    /// Cursor of `get_next_ddl_event`: last finished ts handed out.
    next_read_ts: Ts,
}

struct CatalogState {
    resolved_ts: Ts,
    finished_ddl_ts: Ts,
    schema_version: SchemaVersion,
    database_map: DatabaseInfoMap,
    /// Only tables with registered dispatchers have a store.
    table_stores: HashMap<TableId, Arc<VersionedTableInfoStore>>,
    dispatchers: HashMap<DispatcherId, DispatcherInfo>,
}

struct Shared {
    storage: PersistentStorage,
    cache: UnsortedDdlCache,
    state: Mutex<CatalogState>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Time-versioned catalog of table definitions with dispatcher lifecycle.
pub struct SchemaStore {
    shared: Arc<Shared>,
    event_tx: Sender<StoreEvent>,
    event_rx: Mutex<Option<Receiver<StoreEvent>>>,
    shutdown: Shutdown,
    upstream: Option<Arc<dyn SnapshotMeta>>,
}

impl SchemaStore {
    /// Open the persistent log under `dir` and recover watermarks, the
    /// database map, and the unresolved-event backlog.
    pub fn new(dir: &Path, config: &Config) -> SchemaStoreResult<Self> {
        let recovered = PersistentStorage::open(dir, config.storage.clone())?;
        let cache = UnsortedDdlCache::new();
        for event in recovered.unapplied {
            cache.add(event);
        }
        info!(
            resolved_ts = %recovered.meta.resolved_ts,
            finished_ddl_ts = %recovered.meta.finished_ddl_ts,
            backlog = cache.len(),
            "schema store recovered"
        );

        let (event_tx, event_rx) = unbounded();
        Ok(Self {
            shared: Arc::new(Shared {
                storage: recovered.storage,
                cache,
                state: Mutex::new(CatalogState {
                    resolved_ts: recovered.meta.resolved_ts,
                    finished_ddl_ts: recovered.meta.finished_ddl_ts,
                    schema_version: recovered.meta.schema_version,
                    database_map: recovered.database_map,
                    table_stores: HashMap::new(),
                    dispatchers: HashMap::new(),
                }),
            }),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown: Shutdown::new(),
            upstream: None,
        })
    }

    /// Attach the upstream KV surface used by `get_all_physical_tables`.
    pub fn with_upstream(mut self, upstream: Arc<dyn SnapshotMeta>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Non-blocking enqueue of a DDL event from the region puller.
    pub fn write_ddl_event(&self, event: DdlEvent) -> SchemaStoreResult<()> {
        self.event_tx
            .send(StoreEvent::Ddl(event))
            .map_err(|_| SchemaStoreError::Closed)
    }

    /// Non-blocking enqueue of a resolved-ts advance.
    pub fn advance_resolved_ts(&self, ts: Ts) -> SchemaStoreResult<()> {
        self.event_tx
            .send(StoreEvent::ResolvedTs(ts))
            .map_err(|_| SchemaStoreError::Closed)
    }

    /// Run the event-drain loop and the supplied DDL-job fetcher as two
    /// tasks under one cancellation scope. The first error cancels the
    /// scope; both tasks exit before this returns.
    pub fn run<F>(&self, fetcher: F) -> SchemaStoreResult<()>
    where
        F: FnOnce(Shutdown) -> SchemaStoreResult<()> + Send + 'static,
    {
        let rx = self
            .event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SchemaStoreError::AlreadyRunning)?;

        let drain = {
            let shared = Arc::clone(&self.shared);
            let shutdown = self.shutdown.clone();
            std::thread::spawn(move || {
                let result = drain_loop(&shared, &rx, &shutdown);
                if result.is_err() {
                    shutdown.cancel();
                }
                result
            })
        };
        let fetch = {
            let shutdown = self.shutdown.clone();
            std::thread::spawn(move || {
                let result = fetcher(shutdown.clone());
                if result.is_err() {
                    shutdown.cancel();
                }
                result
            })
        };

        let drain_result = drain.join().unwrap_or_else(|_| {
            Err(SchemaStoreError::Corruption {
                reason: "event drain task panicked".to_string(),
            })
        });
        let fetch_result = fetch.join().unwrap_or_else(|_| {
            Err(SchemaStoreError::Corruption {
                reason: "ddl fetcher task panicked".to_string(),
            })
        });
        drain_result.and(fetch_result)
    }

    /// Stop the tasks and flush the persistent log.
    pub fn close(&self) {
        self.shutdown.cancel();
        if let Err(err) = self.shared.storage.flush() {
            warn!("flush on close failed: {err}");
        }
    }

    /// List all non-system physical tables at `snap_ts` from upstream.
    pub fn get_all_physical_tables(&self, snap_ts: Ts) -> SchemaStoreResult<Vec<TableId>> {
        let upstream = self.upstream.as_ref().ok_or(SchemaStoreError::Upstream {
            reason: "no upstream kv storage attached".to_string(),
        })?;
        let databases = upstream
            .list_databases(snap_ts)
            .map_err(|e| SchemaStoreError::Upstream { reason: e.reason })?;
        let mut tables = Vec::new();
        for (database_id, name) in databases {
            if is_system_database(&name) {
                continue;
            }
            tables.extend(
                upstream
                    .tables_by_database(snap_ts, database_id)
                    .map_err(|e| SchemaStoreError::Upstream { reason: e.reason })?,
            );
        }
        Ok(tables)
    }

    /// Register a dispatcher for `(table_id, start_ts)`.
    ///
    /// Rebuilding history is I/O-heavy and happens outside the catalog
    /// mutex; concurrent registrations for the same table converge through
    /// a final-write-wins merge that keeps the store with the older first
    /// version and carries the other's tail and dispatchers over.
    pub fn register_dispatcher(
        &self,
        dispatcher_id: DispatcherId,
        table_id: TableId,
        start_ts: Ts,
    ) -> SchemaStoreResult<()> {
        enum Plan {
            Fresh {
                store: Arc<VersionedTableInfoStore>,
                end_ts: Ts,
            },
            Existing {
                store: Arc<VersionedTableInfoStore>,
            },
        }

        let shared = &self.shared;
        let plan = {
            let mut state = shared.lock_state();
            let gc_ts = shared.storage.gc_ts();
            if start_ts < gc_ts {
                return Err(SchemaStoreError::TooOld { start_ts, gc_ts });
            }
            state.dispatchers.insert(
                dispatcher_id,
                DispatcherInfo {
                    table_id,
                    next_read_ts: start_ts,
                },
            );
            match state.table_stores.get(&table_id) {
                None => {
                    let store = Arc::new(VersionedTableInfoStore::new(table_id));
                    store.register_dispatcher(dispatcher_id, start_ts);
                    state.table_stores.insert(table_id, Arc::clone(&store));
                    Plan::Fresh {
                        store,
                        end_ts: state.finished_ddl_ts,
                    }
                }
                Some(store) => {
                    store.register_dispatcher(dispatcher_id, start_ts);
                    Plan::Existing {
                        store: Arc::clone(store),
                    }
                }
            }
        };

        let resolver = |database_id: DatabaseId| -> Option<String> {
            let state = shared.lock_state();
            state
                .database_map
                .get(&database_id)
                .map(|info| info.name.clone())
        };

        match plan {
            Plan::Fresh { store, end_ts } => {
                let built = shared.storage.build_versioned_table_info_store(
                    &store, start_ts, end_ts, &resolver,
                );
                // Open the latch even on failure so waiters never hang.
                store.set_initialized();
                if let Err(err) = built {
                    self.rollback_registration(dispatcher_id, table_id);
                    return Err(err.into());
                }
                Ok(())
            }
            Plan::Existing { store } => {
                store.wait_initialized();
                let first = store.first_version();
                if first.is_some_and(|fv| fv <= start_ts) {
                    return Ok(());
                }
                let end_ts = first.unwrap_or_else(|| shared.lock_state().finished_ddl_ts);

                let new_store = Arc::new(VersionedTableInfoStore::new(table_id));
                let built = shared.storage.build_versioned_table_info_store(
                    &new_store, start_ts, end_ts, &resolver,
                );
                if let Err(err) = built {
                    self.rollback_registration(dispatcher_id, table_id);
                    return Err(err.into());
                }
                new_store.set_initialized();

                let mut state = shared.lock_state();
                let gc_ts = shared.storage.gc_ts();
                if start_ts < gc_ts {
                    state.dispatchers.remove(&dispatcher_id);
                    if let Some(current) = state.table_stores.get(&table_id)
                        && current.unregister_dispatcher(dispatcher_id)
                    {
                        state.table_stores.remove(&table_id);
                    }
                    return Err(SchemaStoreError::TooOld { start_ts, gc_ts });
                }
                match state.table_stores.get(&table_id) {
                    Some(current) => {
                        let current_first = current.first_version().unwrap_or(Ts::MAX);
                        let new_first = new_store.first_version().unwrap_or(Ts::MAX);
                        if current_first <= new_first {
                            return Ok(());
                        }
                        new_store.check_and_copy_tail_from(current);
                        new_store.copy_registered_dispatchers(current);
                        state.table_stores.insert(table_id, new_store);
                        Ok(())
                    }
                    None => {
                        // Our own registration pins the store, so this slot
                        // going empty mid-flight is unexpected; reinstate.
                        warn!(%table_id, "table store vanished during registration");
                        new_store.register_dispatcher(dispatcher_id, start_ts);
                        state.table_stores.insert(table_id, new_store);
                        Ok(())
                    }
                }
            }
        }
    }

    pub fn update_dispatcher_send_ts(
        &self,
        dispatcher_id: DispatcherId,
        ts: Ts,
    ) -> SchemaStoreResult<()> {
        let state = self.shared.lock_state();
        let info = state
            .dispatchers
            .get(&dispatcher_id)
            .ok_or(SchemaStoreError::DispatcherNotFound { dispatcher_id })?;
        if let Some(store) = state.table_stores.get(&info.table_id) {
            store.update_dispatcher_send_ts(dispatcher_id, ts);
        }
        Ok(())
    }

    pub fn unregister_dispatcher(&self, dispatcher_id: DispatcherId) -> SchemaStoreResult<()> {
        let mut state = self.shared.lock_state();
        let info = state
            .dispatchers
            .remove(&dispatcher_id)
            .ok_or(SchemaStoreError::DispatcherNotFound { dispatcher_id })?;
        if let Some(store) = state.table_stores.get(&info.table_id)
            && store.unregister_dispatcher(dispatcher_id)
        {
            state.table_stores.remove(&info.table_id);
        }
        Ok(())
    }

    pub fn get_max_finished_ddl_ts(&self) -> Ts {
        self.shared.lock_state().finished_ddl_ts
    }

    pub fn resolved_ts(&self) -> Ts {
        self.shared.lock_state().resolved_ts
    }

    pub fn gc_ts(&self) -> Ts {
        self.shared.storage.gc_ts()
    }

    /// Snapshot of the recovered/maintained database map.
    pub fn database_infos(&self) -> DatabaseInfoMap {
        self.shared.lock_state().database_map.clone()
    }

    /// Point-in-time schema lookup. Blocks until the table's store has
    /// finished initializing.
    pub fn get_table_info(&self, table_id: TableId, ts: Ts) -> SchemaStoreResult<Arc<TableInfo>> {
        let store = {
            let state = self.shared.lock_state();
            state
                .table_stores
                .get(&table_id)
                .cloned()
                .ok_or(SchemaStoreError::TableNotFound { table_id })?
        };
        store.wait_initialized();
        Ok(store.table_info(ts)?)
    }

    /// Next DDL event the dispatcher has not yet consumed, bounded by its
    /// send ts. `None` when it is caught up.
    pub fn get_next_ddl_event(
        &self,
        dispatcher_id: DispatcherId,
    ) -> SchemaStoreResult<Option<DdlEvent>> {
        let (table_id, cursor, send_ts) = {
            let state = self.shared.lock_state();
            let info = state
                .dispatchers
                .get(&dispatcher_id)
                .ok_or(SchemaStoreError::DispatcherNotFound { dispatcher_id })?;
            let store = state
                .table_stores
                .get(&info.table_id)
                .ok_or(SchemaStoreError::TableNotFound {
                    table_id: info.table_id,
                })?;
            let send_ts = store
                .dispatcher_send_ts(dispatcher_id)
                .unwrap_or(info.next_read_ts);
            (info.table_id, info.next_read_ts, send_ts)
        };
        if send_ts <= cursor {
            return Ok(None);
        }
        let events = self
            .shared
            .storage
            .read_table_ddl_events(table_id, cursor, send_ts)?;
        match events.into_iter().next() {
            Some(event) => {
                let mut state = self.shared.lock_state();
                if let Some(info) = state.dispatchers.get_mut(&dispatcher_id) {
                    info.next_read_ts = event.job.finished_ts();
                }
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Garbage-collect history up to `min(upstream_safepoint, min send ts)`.
    /// Returns the floor actually applied.
    pub fn do_gc(&self, upstream_safepoint: Ts) -> SchemaStoreResult<Ts> {
        let min_send_ts = {
            let state = self.shared.lock_state();
            state
                .table_stores
                .values()
                .filter_map(|store| store.min_send_ts())
                .min()
        };
        let floor = match min_send_ts {
            Some(ts) => ts.min(upstream_safepoint),
            None => upstream_safepoint,
        };
        if floor <= self.shared.storage.gc_ts() {
            return Ok(self.shared.storage.gc_ts());
        }

        self.shared.storage.gc(floor)?;
        let stores: Vec<_> = {
            let state = self.shared.lock_state();
            state.table_stores.values().cloned().collect()
        };
        for store in stores {
            store.gc(floor);
        }
        info!(floor = %floor, "schema history collected");
        Ok(floor)
    }

    fn rollback_registration(&self, dispatcher_id: DispatcherId, table_id: TableId) {
        let mut state = self.shared.lock_state();
        state.dispatchers.remove(&dispatcher_id);
        if let Some(store) = state.table_stores.get(&table_id)
            && store.unregister_dispatcher(dispatcher_id)
        {
            state.table_stores.remove(&table_id);
        }
    }
}

fn drain_loop(
    shared: &Shared,
    rx: &Receiver<StoreEvent>,
    shutdown: &Shutdown,
) -> SchemaStoreResult<()> {
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(StoreEvent::Ddl(event)) => {
                debug!(
                    commit_ts = %event.commit_ts,
                    job_type = ?event.job.job_type,
                    "buffering ddl event"
                );
                shared.cache.add(event.clone());
                shared.storage.write_ddl_event(&event)?;
            }
            Ok(StoreEvent::ResolvedTs(ts)) => advance_resolved(shared, ts)?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn advance_resolved(shared: &Shared, ts: Ts) -> SchemaStoreResult<()> {
    let (current_finished, current_version) = {
        let state = shared.lock_state();
        if ts < state.resolved_ts {
            warn!(%ts, resolved = %state.resolved_ts, "resolved ts moved backwards, ignoring");
            return Ok(());
        }
        (state.finished_ddl_ts, state.schema_version)
    };

    let mut events = shared.cache.fetch_before(ts);
    let (new_finished, new_version) = events
        .last()
        .map(|e| (e.job.finished_ts(), e.job.version))
        .unwrap_or((current_finished, current_version));
    // A batch of pure replays must not regress the durable watermarks.
    let new_finished = new_finished.max(current_finished);
    let new_version = new_version.max(current_version);

    // Durable fence: watermarks advance only after every covered DDL frame
    // is on disk.
    shared.storage.update_store_meta(ts, new_finished, new_version)?;

    let mut state = shared.lock_state();
    state.resolved_ts = ts;
    for event in &mut events {
        if event.job.version <= state.schema_version
            || event.job.finished_ts() <= state.finished_ddl_ts
        {
            warn!(
                finished_ts = %event.job.finished_ts(),
                version = %event.job.version,
                "skipping already applied ddl job"
            );
            continue;
        }
        handle_resolved_job(&mut state, &mut event.job)?;
        state.schema_version = event.job.version;
        state.finished_ddl_ts = event.job.finished_ts();
    }
    Ok(())
}

fn handle_resolved_job(state: &mut CatalogState, job: &mut DdlJob) -> SchemaStoreResult<()> {
    if job.job_type != DdlJobType::CreateSchema {
        fill_schema_name(state, job)?;
    }

    match job.job_type {
        DdlJobType::CreateSchema => {
            if state.database_map.contains_key(&job.schema_id) {
                return Err(SchemaStoreError::DatabaseExists {
                    database_id: job.schema_id,
                });
            }
            apply_job_to_catalog(&mut state.database_map, job);
            Ok(())
        }
        DdlJobType::ModifySchemaCharset => Ok(()),
        DdlJobType::DropSchema => {
            let info = state.database_map.get(&job.schema_id).ok_or(
                SchemaStoreError::DatabaseNotFound {
                    database_id: job.schema_id,
                },
            )?;
            if info.is_deleted() {
                return Err(SchemaStoreError::DatabaseDropped {
                    database_id: job.schema_id,
                });
            }
            apply_job_to_catalog(&mut state.database_map, job);
            Ok(())
        }
        DdlJobType::RenameTables => {
            let args = RenameTablesArgs::decode(&job.args).map_err(|e| {
                SchemaStoreError::BadJobArgs {
                    reason: e.to_string(),
                }
            })?;
            apply_job_to_catalog(&mut state.database_map, job);
            for (idx, table_id) in args.old_table_ids.iter().enumerate() {
                if let Some(store) = state.table_stores.get(table_id) {
                    store.apply_rename(
                        &args.new_table_names[idx],
                        job.finished_ts(),
                        job.binlog.schema_version,
                    );
                }
            }
            Ok(())
        }
        kind if kind.creates_table() => {
            // No dispatcher can be registered before the table exists.
            if state.table_stores.contains_key(&job.table_id) {
                return Err(SchemaStoreError::Corruption {
                    reason: format!(
                        "versioned store already exists for newly created table {}",
                        job.table_id
                    ),
                });
            }
            apply_job_to_catalog(&mut state.database_map, job);
            Ok(())
        }
        _ => {
            let store = state.table_stores.get(&job.table_id).ok_or(
                SchemaStoreError::TableNotFound {
                    table_id: job.table_id,
                },
            )?;
            store.apply_ddl(job);
            Ok(())
        }
    }
}

fn fill_schema_name(state: &CatalogState, job: &mut DdlJob) -> SchemaStoreResult<()> {
    let info = state
        .database_map
        .get(&job.schema_id)
        .ok_or(SchemaStoreError::DatabaseNotFound {
            database_id: job.schema_id,
        })?;
    let finished_ts = job.finished_ts();
    if info.create_version > finished_ts {
        return Err(SchemaStoreError::DatabaseNotCreated {
            database_id: job.schema_id,
            finished_ts,
        });
    }
    if info.delete_version < finished_ts {
        return Err(SchemaStoreError::DatabaseDropped {
            database_id: job.schema_id,
        });
    }
    job.schema_name = info.name.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::core::{BinlogInfo, ColumnInfo};

    fn store_at(dir: &Path) -> SchemaStore {
        SchemaStore::new(dir, &Config::default()).unwrap()
    }

    fn table_info(table: i64, name: &str, version: i64) -> TableInfo {
        TableInfo {
            id: TableId::new(table),
            name: name.to_string(),
            schema_version: SchemaVersion::new(version),
            columns: vec![ColumnInfo {
                id: 1,
                name: "id".to_string(),
                column_type: "bigint".to_string(),
            }],
        }
    }

    fn table_event(table: i64, finished_ts: u64, name: &str) -> DdlEvent {
        DdlEvent {
            job: DdlJob {
                job_type: DdlJobType::AddColumn,
                schema_id: DatabaseId::new(1),
                table_id: TableId::new(table),
                schema_name: String::new(),
                version: SchemaVersion::new(finished_ts as i64),
                binlog: BinlogInfo {
                    finished_ts: Ts::new(finished_ts),
                    schema_version: SchemaVersion::new(finished_ts as i64),
                    table_info: Some(table_info(table, name, finished_ts as i64)),
                },
                args: serde_json::Value::Null,
            },
            commit_ts: Ts::new(finished_ts),
        }
    }

    fn seed_log(dir: &Path, events: &[DdlEvent], finished: u64) {
        let store = store_at(dir);
        for event in events {
            store.shared.storage.write_ddl_event(event).unwrap();
        }
        store
            .shared
            .storage
            .update_store_meta(
                Ts::new(finished),
                Ts::new(finished),
                SchemaVersion::new(finished as i64),
            )
            .unwrap();
    }

    #[test]
    fn register_builds_history_with_base_version() {
        let dir = TempDir::new().unwrap();
        seed_log(
            dir.path(),
            &[
                table_event(7, 30, "a"),
                table_event(7, 60, "b"),
                table_event(7, 100, "c"),
            ],
            110,
        );

        let store = store_at(dir.path());
        let d1 = DispatcherId::random();
        store
            .register_dispatcher(d1, TableId::new(7), Ts::new(50))
            .unwrap();

        let info = store.get_table_info(TableId::new(7), Ts::new(50)).unwrap();
        assert_eq!(info.name, "a");
        let info = store.get_table_info(TableId::new(7), Ts::new(60)).unwrap();
        assert_eq!(info.name, "b");
    }

    #[test]
    fn register_below_gc_floor_is_too_old() {
        let dir = TempDir::new().unwrap();
        seed_log(dir.path(), &[table_event(7, 120, "a")], 150);

        let store = store_at(dir.path());
        store.shared.storage.gc(Ts::new(100)).unwrap();

        let err = store
            .register_dispatcher(DispatcherId::random(), TableId::new(7), Ts::new(99))
            .unwrap_err();
        assert!(matches!(err, SchemaStoreError::TooOld { .. }));

        store
            .register_dispatcher(DispatcherId::random(), TableId::new(7), Ts::new(101))
            .unwrap();
    }

    #[test]
    fn unregister_last_dispatcher_drops_the_store() {
        let dir = TempDir::new().unwrap();
        seed_log(dir.path(), &[table_event(7, 30, "a")], 40);

        let store = store_at(dir.path());
        let d1 = DispatcherId::random();
        let d2 = DispatcherId::random();
        store
            .register_dispatcher(d1, TableId::new(7), Ts::new(35))
            .unwrap();
        store
            .register_dispatcher(d2, TableId::new(7), Ts::new(35))
            .unwrap();

        store.unregister_dispatcher(d1).unwrap();
        assert!(store.get_table_info(TableId::new(7), Ts::new(35)).is_ok());

        store.unregister_dispatcher(d2).unwrap();
        let err = store
            .get_table_info(TableId::new(7), Ts::new(35))
            .unwrap_err();
        assert!(matches!(err, SchemaStoreError::TableNotFound { .. }));

        let err = store.unregister_dispatcher(d2).unwrap_err();
        assert!(matches!(err, SchemaStoreError::DispatcherNotFound { .. }));
    }

    #[test]
    fn send_ts_updates_are_monotone_and_bound_gc() {
        let dir = TempDir::new().unwrap();
        seed_log(
            dir.path(),
            &[table_event(7, 30, "a"), table_event(7, 60, "b")],
            70,
        );

        let store = store_at(dir.path());
        let d1 = DispatcherId::random();
        store
            .register_dispatcher(d1, TableId::new(7), Ts::new(30))
            .unwrap();
        store
            .update_dispatcher_send_ts(d1, Ts::new(40))
            .unwrap();

        // Dispatcher still needs ts 40: gc clamps to the min send ts.
        let applied = store.do_gc(Ts::new(65)).unwrap();
        assert_eq!(applied, Ts::new(40));
        assert_eq!(store.gc_ts(), Ts::new(40));

        let err = store
            .update_dispatcher_send_ts(DispatcherId::random(), Ts::new(50))
            .unwrap_err();
        assert!(matches!(err, SchemaStoreError::DispatcherNotFound { .. }));
    }

    #[test]
    fn next_ddl_event_iterates_up_to_send_ts() {
        let dir = TempDir::new().unwrap();
        seed_log(
            dir.path(),
            &[
                table_event(7, 30, "a"),
                table_event(7, 60, "b"),
                table_event(7, 100, "c"),
            ],
            110,
        );

        let store = store_at(dir.path());
        let d1 = DispatcherId::random();
        store
            .register_dispatcher(d1, TableId::new(7), Ts::new(30))
            .unwrap();
        store.update_dispatcher_send_ts(d1, Ts::new(100)).unwrap();

        let event = store.get_next_ddl_event(d1).unwrap().unwrap();
        assert_eq!(event.job.finished_ts(), Ts::new(60));
        let event = store.get_next_ddl_event(d1).unwrap().unwrap();
        assert_eq!(event.job.finished_ts(), Ts::new(100));
        assert!(store.get_next_ddl_event(d1).unwrap().is_none());
    }
}
