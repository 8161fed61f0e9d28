// datasnap/src/store/postgres.rs
use regex::Regex;
use serde_json::Value;
use sqlx::error::ErrorKind;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, Mutex};
use tracing::{debug, warn};

use super::DataStore;
use crate::errors::StoreError;
use crate::schema::{Columns, Relation, RowId, Table};
use crate::utils::sequence_reset;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

#[derive(Default)]
struct TargetColumns {
    names: HashSet<String>,
    /// `numeric` columns, read as text so no digit goes through `f64`.
    numeric: Vec<String>,
    reported: HashSet<String>,
}

/// Column names of each table to project as text, keyed by table.
type TextColumns = HashMap<Table, Vec<String>>;

/// `DataStore` over a Postgres database (the schema Prisma migrates).
pub struct PgStore {
    pool: PgPool,
    columns: Mutex<HashMap<Table, TargetColumns>>,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgStore {
            pool,
            columns: Mutex::new(HashMap::new()),
        })
    }

    pub async fn check_connection(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Loads the migrated table's columns once per table.
    async fn load_columns(&self, table: Table) -> Result<(), StoreError> {
        if self.lock_columns().get(&table).is_some_and(|c| !c.names.is_empty()) {
            return Ok(());
        }

        let columns: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table.name())
        .fetch_all(&self.pool)
        .await?;

        if columns.is_empty() {
            return Err(StoreError::UnexpectedShape {
                table,
                message: "table does not exist in the target schema".to_string(),
            });
        }

        let mut cache = self.lock_columns();
        let entry = cache.entry(table).or_default();
        entry.numeric = columns
            .iter()
            .filter(|(_, data_type)| data_type == "numeric")
            .map(|(name, _)| name.clone())
            .collect();
        entry.names = columns.into_iter().map(|(name, _)| name).collect();
        Ok(())
    }

    /// Columns the migrated table actually has.
    async fn target_columns(&self, table: Table) -> Result<HashSet<String>, StoreError> {
        self.load_columns(table).await?;
        Ok(self
            .lock_columns()
            .get(&table)
            .map(|c| c.names.clone())
            .unwrap_or_default())
    }

    async fn numeric_columns(&self, table: Table) -> Result<Vec<String>, StoreError> {
        self.load_columns(table).await?;
        Ok(self
            .lock_columns()
            .get(&table)
            .map(|c| c.numeric.clone())
            .unwrap_or_default())
    }

    /// Warns once per table and column about snapshot data the schema dropped.
    fn report_dropped_columns(&self, table: Table, dropped: &[&str]) {
        let mut cache = self.lock_columns();
        let entry = cache.entry(table).or_default();
        for column in dropped {
            if entry.reported.insert((*column).to_string()) {
                warn!(%table, column, "column no longer exists after migration; its values are not restored");
            }
        }
    }

    fn lock_columns(&self) -> std::sync::MutexGuard<'_, HashMap<Table, TargetColumns>> {
        self.columns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DataStore for PgStore {
    async fn find_many(&self, table: Table, include: &[Relation]) -> Result<Vec<Value>, StoreError> {
        let mut text_columns = TextColumns::new();
        for t in std::iter::once(table).chain(include.iter().map(|r| r.table)) {
            text_columns.insert(t, self.numeric_columns(t).await?);
        }
        let sql = select_all_sql(table, include, &text_columns)?;
        debug!(%table, sql = %sql, "fetching rows");
        let rows = sqlx::query_scalar::<_, Value>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_unique(&self, table: Table, id: &RowId) -> Result<Option<Value>, StoreError> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.\"id\"::text = $1",
            quote_ident(table.name())
        );
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn upsert(&self, table: Table, id: &RowId, data: &Columns) -> Result<Value, StoreError> {
        let target = self.target_columns(table).await?;
        let (kept, dropped): (Vec<&str>, Vec<&str>) = data
            .keys()
            .map(String::as_str)
            .partition(|column| target.contains(*column));
        if !dropped.is_empty() {
            self.report_dropped_columns(table, &dropped);
        }

        let sql = upsert_sql(table, &kept)?;
        debug!(%table, %id, "upserting row");
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(data.clone()))
            .fetch_one(&self.pool)
            .await
            .map_err(constraint_rejection)?;
        Ok(row)
    }

    async fn sync_id_sequence(&self, table: Table) -> Result<Option<i64>, StoreError> {
        sequence_reset::reset_id_sequence(&self.pool, table).await
    }
}

/// Constraint violations are the row's fault, not the connection's.
fn constraint_rejection(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(db_error)
            if matches!(
                db_error.kind(),
                ErrorKind::ForeignKeyViolation
                    | ErrorKind::UniqueViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) =>
        {
            StoreError::Rejected(db_error.message().to_string())
        }
        other => StoreError::Sqlx(other),
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn checked_ident(name: &str) -> Result<String, StoreError> {
    if IDENTIFIER.is_match(name) {
        Ok(quote_ident(name))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// JSON object for the row aliased `alias`, with `text_columns` overridden
/// by their text form (`numeric` keeps every digit that way, and
/// `jsonb_populate_record` parses the string back on restore).
fn row_json(alias: &str, text_columns: &[String]) -> Result<String, StoreError> {
    if text_columns.is_empty() {
        return Ok(format!("to_jsonb({alias})"));
    }
    let pairs: Vec<String> = text_columns
        .iter()
        .map(|column| -> Result<String, StoreError> {
            let quoted = checked_ident(column)?;
            Ok(format!("'{column}', {alias}.{quoted}::text"))
        })
        .collect::<Result<_, StoreError>>()?;
    Ok(format!("(to_jsonb({alias}) || jsonb_build_object({}))", pairs.join(", ")))
}

/// `SELECT` returning each row as one JSON object, with `include` relations
/// aggregated into arrays keyed by relation name.
fn select_all_sql(table: Table, include: &[Relation], text_columns: &TextColumns) -> Result<String, StoreError> {
    let text_of = |t: Table| text_columns.get(&t).map(Vec::as_slice).unwrap_or_default();
    let mut projection = row_json("t", text_of(table))?;
    if !include.is_empty() {
        let pairs: Vec<String> = include
            .iter()
            .map(|relation| -> Result<String, StoreError> {
                Ok(format!(
                    "'{}', COALESCE((SELECT jsonb_agg({}) FROM {} c WHERE c.{} = t.\"id\"), '[]'::jsonb)",
                    relation.name,
                    row_json("c", text_of(relation.table))?,
                    quote_ident(relation.table.name()),
                    quote_ident(relation.foreign_key)
                ))
            })
            .collect::<Result<_, StoreError>>()?;
        projection = format!("{} || jsonb_build_object({})", projection, pairs.join(", "));
    }
    Ok(format!("SELECT {} FROM {} t", projection, quote_ident(table.name())))
}

/// Insert-or-update keyed on `id`. The row is bound as a single JSONB
/// parameter and expanded with `jsonb_populate_record`, so column types come
/// from the target table rather than from the snapshot.
fn upsert_sql(table: Table, columns: &[&str]) -> Result<String, StoreError> {
    if !columns.contains(&"id") {
        return Err(StoreError::UnexpectedShape {
            table,
            message: "row has no id column".to_string(),
        });
    }

    let quoted: Vec<String> = columns
        .iter()
        .map(|column| checked_ident(column))
        .collect::<Result<_, _>>()?;
    let column_list = quoted.join(", ");

    let mut assignments: Vec<String> = quoted
        .iter()
        .filter(|column| column.as_str() != "\"id\"")
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect();
    if assignments.is_empty() {
        // DO NOTHING would return no row on conflict.
        assignments.push("\"id\" = EXCLUDED.\"id\"".to_string());
    }

    let table_name = quote_ident(table.name());
    Ok(format!(
        "INSERT INTO {table_name} AS t ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_record(NULL::{table_name}, $1) \
         ON CONFLICT (\"id\") DO UPDATE SET {} \
         RETURNING to_jsonb(t)",
        assignments.join(", ")
    ))
}
