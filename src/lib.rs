#![forbid(unsafe_code)]

//! Change-data-capture ingestion substrate.
//!
//! Two subsystems carry the load: the [`dynstream`] dispatcher routes
//! per-path row events across a fixed fleet of worker streams with area
//! memory accounting, and the [`schemastore`] maintains a time-versioned
//! catalog of table definitions against which those events are interpreted.

pub mod config;
pub mod core;
pub mod dynstream;
pub mod error;
pub mod schemastore;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the main entry points at the crate root for convenience.
pub use crate::core::{
    BinlogInfo, ColumnInfo, DatabaseId, DatabaseInfo, DatabaseInfoMap, DdlEvent, DdlJob,
    DdlJobType, DispatcherId, RenameTablesArgs, SchemaVersion, TableId, TableInfo, Ts,
};
pub use crate::dynstream::{
    AreaSettings, DynStreamError, DynamicStream, EventHandler, Feedback, Handle, MixPathHasher,
    ParallelDynamicStream, PathHasher, StreamOptions,
};
pub use crate::schemastore::{
    SchemaStore, SchemaStoreError, SnapshotMeta, StoreMeta, VersionedTableInfoStore,
};
