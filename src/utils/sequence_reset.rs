// datasnap/src/utils/sequence_reset.rs
use sqlx::{Pool, Postgres};
use tracing::debug;

use crate::errors::StoreError;
use crate::schema::Table;
use crate::store::postgres::quote_ident;

/// Resets the serial sequence behind `table.id` to `MAX(id) + 1`.
///
/// Restored rows keep their original ids, so without this the next insert
/// through the application collides with a restored row. Tables whose `id`
/// has no owned sequence (string ids) are left alone and yield `None`.
pub async fn reset_id_sequence(db_pool: &Pool<Postgres>, table: Table) -> Result<Option<i64>, StoreError> {
    let quoted_table = quote_ident(table.name());

    let sequence: Option<String> = sqlx::query_scalar("SELECT pg_get_serial_sequence($1, 'id')")
        .bind(&quoted_table)
        .fetch_one(db_pool)
        .await?;

    let Some(sequence_name) = sequence else {
        debug!(%table, "no id sequence to reset");
        return Ok(None);
    };

    let max_value_query = format!(
        "SELECT COALESCE(MAX(\"id\"), 0)::bigint FROM {}",
        quoted_table
    );
    let max_val: i64 = sqlx::query_scalar(&max_value_query)
        .fetch_one(db_pool)
        .await?;
    let next_val = max_val + 1;

    sqlx::query("SELECT setval($1::regclass, $2, false)")
        .bind(&sequence_name)
        .bind(next_val)
        .execute(db_pool)
        .await?;

    debug!(%table, sequence = %sequence_name, next_val, "sequence reset");
    Ok(Some(next_val))
}
