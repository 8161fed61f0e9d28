// datasnap/src/store/memory.rs
//! In-process `DataStore` used by the tests.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::DataStore;
use crate::errors::StoreError;
use crate::schema::{Columns, Relation, RowId, Table};

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<Table, Vec<Columns>>>,
    /// Reject writes whose foreign keys point at missing parents, like a
    /// database with FK constraints would.
    enforce_foreign_keys: bool,
    failing_fetch: Option<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_foreign_keys(mut self) -> Self {
        self.enforce_foreign_keys = true;
        self
    }

    pub fn failing_fetch_on(mut self, table: Table) -> Self {
        self.failing_fetch = Some(table);
        self
    }

    /// Seeds rows directly, bypassing constraint checks.
    pub fn insert(&self, table: Table, rows: Vec<Value>) {
        let mut tables = self.lock();
        let entry = tables.entry(table).or_default();
        for row in rows {
            if let Value::Object(columns) = row {
                entry.push(columns);
            }
        }
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.lock()
            .get(&table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn wipe(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Table, Vec<Columns>>> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn has_id(row: &Columns, id: &RowId) -> bool {
    row.get("id").and_then(RowId::from_value).as_ref() == Some(id)
}

impl DataStore for MemoryStore {
    async fn find_many(&self, table: Table, include: &[Relation]) -> Result<Vec<Value>, StoreError> {
        if self.failing_fetch == Some(table) {
            return Err(StoreError::Rejected(format!("simulated fetch failure on {}", table)));
        }

        let tables = self.lock();
        let rows = tables.get(&table).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|mut row| {
                let parent_id = row.get("id").and_then(RowId::from_value);
                for relation in include {
                    let children: Vec<Value> = tables
                        .get(&relation.table)
                        .map(|children| {
                            children
                                .iter()
                                .filter(|child| {
                                    child.get(relation.foreign_key).and_then(RowId::from_value)
                                        == parent_id
                                })
                                .cloned()
                                .map(Value::Object)
                                .collect()
                        })
                        .unwrap_or_default();
                    row.insert(relation.name.to_string(), Value::Array(children));
                }
                Value::Object(row)
            })
            .collect())
    }

    async fn find_unique(&self, table: Table, id: &RowId) -> Result<Option<Value>, StoreError> {
        Ok(self
            .lock()
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| has_id(row, id)))
            .cloned()
            .map(Value::Object))
    }

    async fn upsert(&self, table: Table, id: &RowId, data: &Columns) -> Result<Value, StoreError> {
        if data.values().any(|v| v.is_array() || v.is_object()) {
            return Err(StoreError::Rejected(format!(
                "nested value cannot be written to a column of {}",
                table
            )));
        }

        let mut tables = self.lock();
        if self.enforce_foreign_keys {
            for parent in table.parents() {
                let Some(parent_id) = data.get(parent.column).and_then(RowId::from_value) else {
                    continue;
                };
                let exists = tables
                    .get(&parent.table)
                    .is_some_and(|rows| rows.iter().any(|row| has_id(row, &parent_id)));
                if !exists {
                    return Err(StoreError::Rejected(format!(
                        "foreign key {} violated: {}:{} not found",
                        parent.column, parent.table, parent_id
                    )));
                }
            }
        }

        let rows = tables.entry(table).or_default();
        let row = match rows.iter_mut().find(|row| has_id(row, id)) {
            Some(existing) => {
                for (column, value) in data {
                    existing.insert(column.clone(), value.clone());
                }
                existing.clone()
            }
            None => {
                rows.push(data.clone());
                data.clone()
            }
        };
        Ok(Value::Object(row))
    }
}
