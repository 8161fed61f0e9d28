// datasnap/src/store/mod.rs
//! The narrow data-access contract the backup and restore stages consume.

pub(crate) mod postgres;
#[cfg(test)]
pub(crate) mod memory;

use serde_json::Value;

use crate::errors::StoreError;
use crate::schema::{Columns, Relation, RowId, Table};

pub use postgres::PgStore;

/// Per-table access to the live data store. Rows travel as JSON objects so
/// the contract does not depend on column types beyond table/column names.
#[allow(async_fn_in_trait)]
pub trait DataStore {
    /// Every row of `table` in the store's natural order. Each relation in
    /// `include` is embedded under its name as an array of child rows.
    async fn find_many(&self, table: Table, include: &[Relation]) -> Result<Vec<Value>, StoreError>;

    async fn find_unique(&self, table: Table, id: &RowId) -> Result<Option<Value>, StoreError>;

    /// Updates the row with this `id` when it exists, inserts `data` otherwise.
    async fn upsert(&self, table: Table, id: &RowId, data: &Columns) -> Result<Value, StoreError>;

    /// Moves the table's id generator past the highest restored id.
    /// Returns the next value handed out, or `None` when the table has none.
    async fn sync_id_sequence(&self, _table: Table) -> Result<Option<i64>, StoreError> {
        Ok(None)
    }
}
