// datasnap/src/schema/mod.rs
//! The fixed set of tracked tables and how they reference each other.

pub(crate) mod rows;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use rows::{Columns, ParentLink, Record, RowId};

/// Every table captured by a backup. `Table::ALL` is the dependency order:
/// parents come before the tables that reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Members,
    RetroRequest,
    RetroRequestFile,
    RetroRequestStatusLog,
    FinancialDocuments,
    VehicleMaintenance,
    Usage,
}

/// A column on a child table holding the `id` of a row in `table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    pub column: &'static str,
    pub table: Table,
}

/// A child collection that a backup can embed inside each parent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    /// Key under which the children appear in the parent row.
    pub name: &'static str,
    pub table: Table,
    /// Column on the child table pointing at the parent `id`.
    pub foreign_key: &'static str,
}

const RETRO_REQUEST_PARENTS: &[ParentRef] = &[ParentRef {
    column: "userId",
    table: Table::Members,
}];

const REQUEST_CHILD_PARENTS: &[ParentRef] = &[ParentRef {
    column: "requestId",
    table: Table::RetroRequest,
}];

const RETRO_REQUEST_RELATIONS: &[Relation] = &[
    Relation {
        name: "retro_request_file",
        table: Table::RetroRequestFile,
        foreign_key: "requestId",
    },
    Relation {
        name: "retro_request_status_log",
        table: Table::RetroRequestStatusLog,
        foreign_key: "requestId",
    },
    Relation {
        name: "financial_documents",
        table: Table::FinancialDocuments,
        foreign_key: "requestId",
    },
];

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Members,
        Table::RetroRequest,
        Table::RetroRequestFile,
        Table::RetroRequestStatusLog,
        Table::FinancialDocuments,
        Table::VehicleMaintenance,
        Table::Usage,
    ];

    /// Table name in the database and key in the snapshot document.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Members => "members",
            Table::RetroRequest => "retro_request",
            Table::RetroRequestFile => "retro_request_file",
            Table::RetroRequestStatusLog => "retro_request_status_log",
            Table::FinancialDocuments => "financial_documents",
            Table::VehicleMaintenance => "vehicle_maintenance",
            Table::Usage => "usage",
        }
    }

    pub const fn parents(self) -> &'static [ParentRef] {
        match self {
            Table::RetroRequest => RETRO_REQUEST_PARENTS,
            Table::RetroRequestFile
            | Table::RetroRequestStatusLog
            | Table::FinancialDocuments => REQUEST_CHILD_PARENTS,
            Table::Members | Table::VehicleMaintenance | Table::Usage => &[],
        }
    }

    pub const fn embedded(self) -> &'static [Relation] {
        match self {
            Table::RetroRequest => RETRO_REQUEST_RELATIONS,
            _ => &[],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parents_are_restored_before_children() {
        let position = |table: Table| Table::ALL.iter().position(|t| *t == table);
        for table in Table::ALL {
            for parent in table.parents() {
                assert!(
                    position(parent.table) < position(table),
                    "{} must come before {}",
                    parent.table,
                    table
                );
            }
            for relation in table.embedded() {
                assert!(position(table) < position(relation.table));
            }
        }
    }

    #[test]
    fn test_names_match_serde_keys() -> anyhow::Result<()> {
        for table in Table::ALL {
            let key = serde_json::to_value(table)?;
            assert_eq!(key, serde_json::Value::String(table.name().to_string()));
        }
        Ok(())
    }
}
