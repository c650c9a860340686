//! DDL job and catalog object model.
//!
//! A `DdlEvent` is a schema-change record pulled from the upstream change
//! feed: the job metadata plus the commit timestamp it was observed at.
//! `DatabaseInfo` / `TableInfo` are the catalog objects the jobs mutate.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ids::{DatabaseId, SchemaVersion, TableId};
use super::timestamp::Ts;

/// Kind tag of a DDL job.
///
/// `is_table_scoped` routes everything not handled by a dedicated arm to
/// the owning table's versioned store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdlJobType {
    CreateSchema,
    DropSchema,
    ModifySchemaCharset,
    RenameTables,
    CreateTable,
    CreateTables,
    CreateView,
    RecoverTable,
    DropTable,
    TruncateTable,
    AddColumn,
    DropColumn,
    RenameTable,
}

impl DdlJobType {
    /// True for jobs applied to a single table's versioned store.
    pub fn is_table_scoped(self) -> bool {
        matches!(
            self,
            DdlJobType::DropTable
                | DdlJobType::TruncateTable
                | DdlJobType::AddColumn
                | DdlJobType::DropColumn
                | DdlJobType::RenameTable
        )
    }

    /// True for jobs that bring a new physical table into existence.
    pub fn creates_table(self) -> bool {
        matches!(
            self,
            DdlJobType::CreateTable
                | DdlJobType::CreateTables
                | DdlJobType::CreateView
                | DdlJobType::RecoverTable
        )
    }
}

/// Column of a table schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: i64,
    pub name: String,
    pub column_type: String,
}

/// Point-in-time schema of a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    pub schema_version: SchemaVersion,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Copy of this schema under a new name, as produced by a rename job.
    pub fn renamed(&self, name: impl Into<String>, version: SchemaVersion) -> TableInfo {
        TableInfo {
            id: self.id,
            name: name.into(),
            schema_version: version,
            columns: self.columns.clone(),
        }
    }
}

/// Commit-side metadata of a finished DDL job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogInfo {
    pub finished_ts: Ts,
    pub schema_version: SchemaVersion,
    /// Resulting table schema; absent for schema-level jobs.
    pub table_info: Option<TableInfo>,
}

/// A DDL job as fetched from the upstream catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlJob {
    pub job_type: DdlJobType,
    pub schema_id: DatabaseId,
    pub table_id: TableId,
    /// Filled in from the database map when the job is applied.
    #[serde(default)]
    pub schema_name: String,
    pub version: SchemaVersion,
    pub binlog: BinlogInfo,
    /// Job-type specific arguments, encoded the way the upstream emits them.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl DdlJob {
    pub fn finished_ts(&self) -> Ts {
        self.binlog.finished_ts
    }
}

/// A DDL job plus the commit timestamp it was observed at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlEvent {
    pub job: DdlJob,
    pub commit_ts: Ts,
}

/// Arguments of a `RenameTables` job.
///
/// The upstream encodes these as five parallel positional arrays; the
/// per-index tuples describe one table move each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenameTablesArgs {
    pub old_schema_ids: Vec<DatabaseId>,
    pub new_schema_ids: Vec<DatabaseId>,
    pub new_table_names: Vec<String>,
    pub old_table_ids: Vec<TableId>,
    pub old_schema_names: Vec<String>,
}

impl RenameTablesArgs {
    pub fn decode(args: &serde_json::Value) -> Result<Self, serde_json::Error> {
        type Raw = (Vec<i64>, Vec<i64>, Vec<String>, Vec<i64>, Vec<String>);
        let (old_schema_ids, new_schema_ids, new_table_names, old_table_ids, old_schema_names) =
            Raw::deserialize(args)?;
        Ok(Self {
            old_schema_ids: old_schema_ids.into_iter().map(DatabaseId::new).collect(),
            new_schema_ids: new_schema_ids.into_iter().map(DatabaseId::new).collect(),
            new_table_names,
            old_table_ids: old_table_ids.into_iter().map(TableId::new).collect(),
            old_schema_names,
        })
    }

    pub fn encode(&self) -> serde_json::Value {
        serde_json::json!([
            self.old_schema_ids,
            self.new_schema_ids,
            self.new_table_names,
            self.old_table_ids,
            self.old_schema_names,
        ])
    }
}

/// Catalog state of one database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub tables: BTreeSet<TableId>,
    pub create_version: Ts,
    /// `Ts::MAX` while the database is live.
    pub delete_version: Ts,
}

impl DatabaseInfo {
    pub fn created(name: impl Into<String>, create_version: Ts) -> Self {
        Self {
            name: name.into(),
            tables: BTreeSet::new(),
            create_version,
            delete_version: Ts::MAX,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_version != Ts::MAX
    }

    /// True iff the database exists (created and not yet dropped) at `ts`.
    pub fn is_live_at(&self, ts: Ts) -> bool {
        self.create_version <= ts && ts < self.delete_version
    }
}

/// All known databases, keyed by id.
pub type DatabaseInfoMap = BTreeMap<DatabaseId, DatabaseInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_args_roundtrip() {
        let args = RenameTablesArgs {
            old_schema_ids: vec![DatabaseId::new(1)],
            new_schema_ids: vec![DatabaseId::new(2)],
            new_table_names: vec!["orders_v2".to_string()],
            old_table_ids: vec![TableId::new(10)],
            old_schema_names: vec!["shop".to_string()],
        };
        let decoded = RenameTablesArgs::decode(&args.encode()).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn rename_args_reject_malformed() {
        let bad = serde_json::json!([1, 2, 3]);
        assert!(RenameTablesArgs::decode(&bad).is_err());
    }

    #[test]
    fn database_liveness_window() {
        let mut db = DatabaseInfo::created("shop", Ts::new(100));
        assert!(!db.is_live_at(Ts::new(99)));
        assert!(db.is_live_at(Ts::new(100)));
        assert!(!db.is_deleted());

        db.delete_version = Ts::new(200);
        assert!(db.is_deleted());
        assert!(db.is_live_at(Ts::new(150)));
        assert!(!db.is_live_at(Ts::new(200)));
    }

    #[test]
    fn table_scoped_routing() {
        assert!(DdlJobType::DropTable.is_table_scoped());
        assert!(DdlJobType::AddColumn.is_table_scoped());
        assert!(!DdlJobType::CreateTable.is_table_scoped());
        assert!(DdlJobType::CreateTable.creates_table());
        assert!(!DdlJobType::DropSchema.creates_table());
    }
}
