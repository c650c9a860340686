//! Upstream KV snapshot surface.
//!
//! The region puller owns the real implementation; the schema store only
//! needs to list the catalog at a snapshot timestamp.

use thiserror::Error;

use crate::core::{DatabaseId, TableId, Ts};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("snapshot read failed: {reason}")]
pub struct SnapshotError {
    pub reason: String,
}

impl SnapshotError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Point-in-time view of the upstream catalog.
pub trait SnapshotMeta: Send + Sync {
    fn list_databases(&self, snap_ts: Ts) -> Result<Vec<(DatabaseId, String)>, SnapshotError>;

    fn tables_by_database(
        &self,
        snap_ts: Ts,
        database_id: DatabaseId,
    ) -> Result<Vec<TableId>, SnapshotError>;
}

/// Databases owned by the upstream itself; never exposed downstream.
pub fn is_system_database(name: &str) -> bool {
    name == "mysql" || name == "sys"
}
