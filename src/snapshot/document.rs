// datasnap/src/snapshot/document.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SnapshotError;
use crate::schema::rows::{
    FinancialDocument, Member, RetroRequest, RetroRequestFile, RetroRequestStatusLog, Usage,
    VehicleMaintenance,
};
use crate::schema::{Record, Table};

/// Shape version written into every document. Readers refuse newer versions.
pub const FORMAT_VERSION: u32 = 1;

/// One backup run: every tracked table captured at `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    pub created_at: DateTime<Utc>,
    pub format_version: u32,
    pub tables: SnapshotTables,
}

/// Rows per table. Field order is the dependency order, so the written file
/// reads parents first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotTables {
    pub members: Vec<Member>,
    pub retro_request: Vec<RetroRequest>,
    pub retro_request_file: Vec<RetroRequestFile>,
    pub retro_request_status_log: Vec<RetroRequestStatusLog>,
    pub financial_documents: Vec<FinancialDocument>,
    pub vehicle_maintenance: Vec<VehicleMaintenance>,
    pub usage: Vec<Usage>,
}

#[derive(Deserialize)]
struct DocumentHeader {
    #[serde(rename = "createdAt", alias = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(rename = "formatVersion", alias = "version", default = "legacy_version")]
    format_version: u32,
}

fn legacy_version() -> u32 {
    1
}

impl SnapshotTables {
    pub fn push(&mut self, record: Record) {
        match record {
            Record::Member(row) => self.members.push(row),
            Record::RetroRequest(row) => self.retro_request.push(row),
            Record::RetroRequestFile(row) => self.retro_request_file.push(row),
            Record::RetroRequestStatusLog(row) => self.retro_request_status_log.push(row),
            Record::FinancialDocument(row) => self.financial_documents.push(row),
            Record::VehicleMaintenance(row) => self.vehicle_maintenance.push(row),
            Record::Usage(row) => self.usage.push(row),
        }
    }

    pub fn len(&self, table: Table) -> usize {
        match table {
            Table::Members => self.members.len(),
            Table::RetroRequest => self.retro_request.len(),
            Table::RetroRequestFile => self.retro_request_file.len(),
            Table::RetroRequestStatusLog => self.retro_request_status_log.len(),
            Table::FinancialDocuments => self.financial_documents.len(),
            Table::VehicleMaintenance => self.vehicle_maintenance.len(),
            Table::Usage => self.usage.len(),
        }
    }

    /// Row count per table, in dependency order.
    pub fn counts(&self) -> Vec<(Table, usize)> {
        Table::ALL.iter().map(|t| (*t, self.len(*t))).collect()
    }

    /// Consumes the tables into tagged records, in dependency order.
    pub fn into_records(self) -> Vec<(Table, Vec<Record>)> {
        vec![
            (Table::Members, self.members.into_iter().map(Record::Member).collect()),
            (Table::RetroRequest, self.retro_request.into_iter().map(Record::RetroRequest).collect()),
            (
                Table::RetroRequestFile,
                self.retro_request_file.into_iter().map(Record::RetroRequestFile).collect(),
            ),
            (
                Table::RetroRequestStatusLog,
                self.retro_request_status_log
                    .into_iter()
                    .map(Record::RetroRequestStatusLog)
                    .collect(),
            ),
            (
                Table::FinancialDocuments,
                self.financial_documents.into_iter().map(Record::FinancialDocument).collect(),
            ),
            (
                Table::VehicleMaintenance,
                self.vehicle_maintenance.into_iter().map(Record::VehicleMaintenance).collect(),
            ),
            (Table::Usage, self.usage.into_iter().map(Record::Usage).collect()),
        ]
    }
}

impl SnapshotDocument {
    pub fn new(created_at: DateTime<Utc>, tables: SnapshotTables) -> Self {
        SnapshotDocument {
            created_at,
            format_version: FORMAT_VERSION,
            tables,
        }
    }

    pub fn to_pretty_json(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses and validates a serialized document. A document without a
    /// `tables` object is rejected outright; absent table keys read as empty.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut value: Value = serde_json::from_slice(bytes)?;

        let Some(Value::Object(mut raw_tables)) = value.as_object_mut().and_then(|doc| doc.remove("tables")) else {
            return Err(SnapshotError::MissingTables);
        };

        let header: DocumentHeader = serde_json::from_value(value)?;
        if header.format_version > FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: header.format_version,
                supported: FORMAT_VERSION,
            });
        }

        let mut tables = SnapshotTables::default();
        for table in Table::ALL {
            let rows = match raw_tables.remove(table.name()) {
                None | Some(Value::Null) => continue,
                Some(Value::Array(rows)) => rows,
                Some(_) => {
                    return Err(SnapshotError::MalformedRow {
                        table,
                        message: "table entry is not an array".to_string(),
                    });
                }
            };
            for (index, row) in rows.into_iter().enumerate() {
                let record = Record::from_value(table, row).map_err(|e| SnapshotError::MalformedRow {
                    table,
                    message: format!("row {}: {}", index, e),
                })?;
                tables.push(record);
            }
        }

        for unknown in raw_tables.keys() {
            tracing::warn!(table = %unknown, "snapshot contains an untracked table; it is ignored");
        }

        Ok(SnapshotDocument {
            created_at: header.created_at,
            format_version: header.format_version,
            tables,
        })
    }
}
