//! Core data model: timestamps, identities, and the DDL job model.

pub mod ddl;
pub mod ids;
pub mod timestamp;

pub use ddl::{
    BinlogInfo, ColumnInfo, DatabaseInfo, DatabaseInfoMap, DdlEvent, DdlJob, DdlJobType,
    RenameTablesArgs, TableInfo,
};
pub use ids::{DatabaseId, DispatcherId, SchemaVersion, TableId};
pub use timestamp::Ts;
