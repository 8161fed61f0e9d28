// datasnap/src/schema/rows.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::Table;

/// Every column of a row other than the ones modelled as typed fields.
pub type Columns = Map<String, Value>;

/// Primary key of a tracked row. Prisma models here use either integer or
/// string (cuid/uuid) ids, and the JSON type is preserved on the way back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl RowId {
    pub fn from_value(value: &Value) -> Option<RowId> {
        match value {
            Value::Number(n) => n.as_i64().map(RowId::Int),
            Value::String(s) => Some(RowId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RowId::Int(i) => Value::from(*i),
            RowId::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(i) => write!(f, "{}", i),
            RowId::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! flat_table_row {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub id: RowId,
            #[serde(flatten)]
            pub columns: Columns,
        }
    };
}

flat_table_row!(
    /// A row of `members`.
    Member
);
flat_table_row!(
    /// A file attached to a retro request.
    RetroRequestFile
);
flat_table_row!(
    /// One status transition of a retro request.
    RetroRequestStatusLog
);
flat_table_row!(FinancialDocument);
flat_table_row!(VehicleMaintenance);
flat_table_row!(Usage);

/// A row of `retro_request`. Backups may embed its child collections; those
/// are kept apart from `columns` so they never reach the write layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetroRequest {
    pub id: RowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retro_request_file: Option<Vec<RetroRequestFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retro_request_status_log: Option<Vec<RetroRequestStatusLog>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_documents: Option<Vec<FinancialDocument>>,
    #[serde(flatten)]
    pub columns: Columns,
}

/// A row of any tracked table, tagged with the table it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Member(Member),
    RetroRequest(RetroRequest),
    RetroRequestFile(RetroRequestFile),
    RetroRequestStatusLog(RetroRequestStatusLog),
    FinancialDocument(FinancialDocument),
    VehicleMaintenance(VehicleMaintenance),
    Usage(Usage),
}

macro_rules! with_row {
    ($record:expr, $row:ident => $body:expr) => {
        match $record {
            Record::Member($row) => $body,
            Record::RetroRequest($row) => $body,
            Record::RetroRequestFile($row) => $body,
            Record::RetroRequestStatusLog($row) => $body,
            Record::FinancialDocument($row) => $body,
            Record::VehicleMaintenance($row) => $body,
            Record::Usage($row) => $body,
        }
    };
}

/// A row with embedded relations stripped: exactly what gets upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    pub id: RowId,
    pub columns: Columns,
}

impl FlatRow {
    /// Full column map including `id`, as handed to `DataStore::upsert`.
    pub fn into_data(self) -> Columns {
        let mut data = self.columns;
        data.insert("id".to_string(), self.id.to_value());
        data
    }
}

/// A parent row a record points at through one of its columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub table: Table,
    pub column: &'static str,
    pub id: RowId,
}

impl fmt::Display for ParentLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.column, self.id)
    }
}

impl Record {
    /// Parses one row as returned by the store (or read from a snapshot).
    pub fn from_value(table: Table, value: Value) -> serde_json::Result<Record> {
        Ok(match table {
            Table::Members => Record::Member(serde_json::from_value(value)?),
            Table::RetroRequest => Record::RetroRequest(serde_json::from_value(value)?),
            Table::RetroRequestFile => Record::RetroRequestFile(serde_json::from_value(value)?),
            Table::RetroRequestStatusLog => {
                Record::RetroRequestStatusLog(serde_json::from_value(value)?)
            }
            Table::FinancialDocuments => Record::FinancialDocument(serde_json::from_value(value)?),
            Table::VehicleMaintenance => Record::VehicleMaintenance(serde_json::from_value(value)?),
            Table::Usage => Record::Usage(serde_json::from_value(value)?),
        })
    }

    pub fn table(&self) -> Table {
        match self {
            Record::Member(_) => Table::Members,
            Record::RetroRequest(_) => Table::RetroRequest,
            Record::RetroRequestFile(_) => Table::RetroRequestFile,
            Record::RetroRequestStatusLog(_) => Table::RetroRequestStatusLog,
            Record::FinancialDocument(_) => Table::FinancialDocuments,
            Record::VehicleMaintenance(_) => Table::VehicleMaintenance,
            Record::Usage(_) => Table::Usage,
        }
    }

    pub fn id(&self) -> &RowId {
        with_row!(self, row => &row.id)
    }

    pub fn columns(&self) -> &Columns {
        with_row!(self, row => &row.columns)
    }

    /// Drops embedded child collections, keeping `id` and plain columns.
    pub fn into_flat(self) -> FlatRow {
        with_row!(self, row => FlatRow { id: row.id, columns: row.columns })
    }

    /// Parents this row references. Null or absent foreign keys are ignored.
    pub fn parent_links(&self) -> Vec<ParentLink> {
        let columns = self.columns();
        self.table()
            .parents()
            .iter()
            .filter_map(|parent| {
                columns
                    .get(parent.column)
                    .and_then(RowId::from_value)
                    .map(|id| ParentLink {
                        table: parent.table,
                        column: parent.column,
                        id,
                    })
            })
            .collect()
    }
}
