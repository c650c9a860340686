//! Time-versioned schema catalog fed by a DDL change stream.
//!
//! The orchestrating [`SchemaStore`] drains DDL events and resolved-ts
//! advances, persists them through [`PersistentStorage`], and serves
//! point-in-time table schemas to registered dispatchers.

use thiserror::Error;

use crate::core::{DatabaseId, DispatcherId, TableId, Ts};

pub mod cache;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod table_info;

pub use cache::UnsortedDdlCache;
pub use snapshot::{SnapshotError, SnapshotMeta, is_system_database};
pub use storage::{PersistentStorage, Recovered, StorageError, StorageResult, StoreMeta};
pub use store::{SchemaStore, Shutdown, StoreEvent};
pub use table_info::{TableInfoError, VersionedTableInfoStore};

pub type SchemaStoreResult<T> = Result<T, SchemaStoreError>;

#[derive(Debug, Error)]
pub enum SchemaStoreError {
    #[error("start ts {start_ts} is below the gc floor {gc_ts}")]
    TooOld { start_ts: Ts, gc_ts: Ts },

    #[error("table {table_id} not found")]
    TableNotFound { table_id: TableId },

    #[error("dispatcher {dispatcher_id} not found")]
    DispatcherNotFound { dispatcher_id: DispatcherId },

    #[error("database {database_id} not found")]
    DatabaseNotFound { database_id: DatabaseId },

    #[error("database {database_id} not yet created at {finished_ts}")]
    DatabaseNotCreated {
        database_id: DatabaseId,
        finished_ts: Ts,
    },

    #[error("database {database_id} already dropped")]
    DatabaseDropped { database_id: DatabaseId },

    #[error("database {database_id} already exists")]
    DatabaseExists { database_id: DatabaseId },

    #[error(transparent)]
    TableInfo(#[from] TableInfoError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("malformed job args: {reason}")]
    BadJobArgs { reason: String },

    #[error("upstream snapshot unavailable: {reason}")]
    Upstream { reason: String },

    #[error("corruption: {reason}")]
    Corruption { reason: String },

    #[error("schema store is already running")]
    AlreadyRunning,

    #[error("schema store is closed")]
    Closed,
}
