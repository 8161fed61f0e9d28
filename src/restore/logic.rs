// datasnap/src/restore/logic.rs
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::schema::{ParentLink, Record, RowId, Table};
use crate::snapshot::SnapshotDocument;
use crate::store::DataStore;

/// Ids known to exist in the target, per table.
pub type KnownIds = HashMap<Table, HashSet<RowId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Restored,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowOutcome {
    pub id: RowId,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RowOutcome {
    fn restored(id: RowId) -> Self {
        RowOutcome {
            id,
            status: RowStatus::Restored,
            error: None,
        }
    }

    fn skipped(id: RowId, error: String) -> Self {
        RowOutcome {
            id,
            status: RowStatus::Skipped,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub table: Table,
    pub total: usize,
    pub restored: usize,
    pub skipped: usize,
    pub outcomes: Vec<RowOutcome>,
}

impl TableReport {
    /// Folds per-row outcomes into the table summary.
    pub fn from_outcomes(table: Table, outcomes: Vec<RowOutcome>) -> Self {
        let restored = outcomes
            .iter()
            .filter(|o| o.status == RowStatus::Restored)
            .count();
        TableReport {
            table,
            total: outcomes.len(),
            restored,
            skipped: outcomes.len() - restored,
            outcomes,
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{}: {}/{} restored, {} skipped",
            self.table, self.restored, self.total, self.skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub snapshot_created_at: chrono::DateTime<chrono::Utc>,
    pub tables: Vec<TableReport>,
}

impl RestoreReport {
    pub fn restored(&self) -> usize {
        self.tables.iter().map(|t| t.restored).sum()
    }

    pub fn skipped(&self) -> usize {
        self.tables.iter().map(|t| t.skipped).sum()
    }

    /// Tables with at least one restored row.
    pub fn touched_tables(&self) -> Vec<Table> {
        self.tables
            .iter()
            .filter(|t| t.restored > 0)
            .map(|t| t.table)
            .collect()
    }
}

/// Parent references of `record` whose ids are not among `known`.
pub fn missing_parents(record: &Record, known: &KnownIds) -> Vec<ParentLink> {
    record
        .parent_links()
        .into_iter()
        .filter(|link| !known.get(&link.table).is_some_and(|ids| ids.contains(&link.id)))
        .collect()
}

/// Confirms the parents of `record` exist, asking the store for those not
/// restored in this run. Found parents are remembered in `known`.
async fn check_parents<S: DataStore>(
    store: &S,
    record: &Record,
    known: &mut KnownIds,
) -> Result<(), String> {
    for link in missing_parents(record, known) {
        let found = store
            .find_unique(link.table, &link.id)
            .await
            .map_err(|e| format!("parent lookup on {} failed: {}", link.table, e))?;
        if found.is_none() {
            return Err(format!("parent {} row missing for {}", link.table, link));
        }
        debug!(table = %link.table, id = %link.id, "parent row found in target store");
        known.entry(link.table).or_default().insert(link.id);
    }
    Ok(())
}

async fn restore_row<S: DataStore>(
    store: &S,
    record: Record,
    known: &mut KnownIds,
) -> Result<RowId, (RowId, String)> {
    let table = record.table();
    let id = record.id().clone();

    if let Err(message) = check_parents(store, &record, known).await {
        return Err((id, message));
    }

    let flat = record.into_flat();
    let data = flat.into_data();
    match store.upsert(table, &id, &data).await {
        Ok(_) => {
            known.entry(table).or_default().insert(id.clone());
            Ok(id)
        }
        Err(e) => Err((id, e.to_string())),
    }
}

/// Replays one table's rows in snapshot order. Row failures are recorded and
/// never stop the remaining rows.
pub async fn restore_table<S: DataStore>(
    store: &S,
    table: Table,
    records: Vec<Record>,
    known: &mut KnownIds,
) -> TableReport {
    let mut outcomes = Vec::with_capacity(records.len());
    for record in records {
        let outcome = match restore_row(store, record, known).await {
            Ok(id) => RowOutcome::restored(id),
            Err((id, message)) => {
                warn!(table = %table, id = %id, "{}", message);
                RowOutcome::skipped(id, message)
            }
        };
        outcomes.push(outcome);
    }
    TableReport::from_outcomes(table, outcomes)
}

/// Replays every table of `document` in dependency order.
pub async fn restore_snapshot<S: DataStore>(store: &S, document: SnapshotDocument) -> RestoreReport {
    let snapshot_created_at = document.created_at;
    let mut known = KnownIds::new();
    let mut tables = Vec::new();

    for (table, records) in document.tables.into_records() {
        println!("♻️  Restoring {} ({} rows)...", table, records.len());
        let report = restore_table(store, table, records, &mut known).await;
        println!("   {}", report.summary_line());
        tables.push(report);
    }

    RestoreReport {
        snapshot_created_at,
        tables,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::logic::capture_snapshot;
    use crate::snapshot::SnapshotTables;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn record(table: Table, value: serde_json::Value) -> anyhow::Result<Record> {
        Ok(Record::from_value(table, value)?)
    }

    fn document(rows: Vec<Record>) -> SnapshotDocument {
        let mut tables = SnapshotTables::default();
        for row in rows {
            tables.push(row);
        }
        SnapshotDocument::new(Utc::now(), tables)
    }

    fn report_for(report: &RestoreReport, table: Table) -> anyhow::Result<&TableReport> {
        report
            .tables
            .iter()
            .find(|t| t.table == table)
            .ok_or_else(|| anyhow::anyhow!("no report for {}", table))
    }

    #[test]
    fn test_missing_parents_ignores_known_and_null_links() -> anyhow::Result<()> {
        let request = record(Table::RetroRequest, json!({"id": 10, "userId": 1}))?;
        let orphan_free = record(Table::RetroRequest, json!({"id": 11, "userId": null}))?;

        let mut known = KnownIds::new();
        let missing = missing_parents(&request, &known);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].to_string(), "userId:1");

        known.entry(Table::Members).or_default().insert(RowId::Int(1));
        assert!(missing_parents(&request, &known).is_empty());
        assert!(missing_parents(&orphan_free, &KnownIds::new()).is_empty());
        Ok(())
    }

    #[test]
    fn test_table_report_folds_outcomes() {
        let report = TableReport::from_outcomes(
            Table::Usage,
            vec![
                RowOutcome::restored(RowId::Int(1)),
                RowOutcome::skipped(RowId::Int(2), "boom".to_string()),
                RowOutcome::restored(RowId::Int(3)),
            ],
        );
        assert_eq!((report.total, report.restored, report.skipped), (3, 2, 1));
        assert_eq!(report.summary_line(), "usage: 2/3 restored, 1 skipped");
    }

    #[test]
    fn test_outcome_serializes_lowercase_status() -> anyhow::Result<()> {
        let value = serde_json::to_value(RowOutcome::skipped(RowId::Text("ab".into()), "x".into()))?;
        assert_eq!(value, json!({"id": "ab", "status": "skipped", "error": "x"}));
        let value = serde_json::to_value(RowOutcome::restored(RowId::Int(4)))?;
        assert_eq!(value, json!({"id": 4, "status": "restored"}));
        Ok(())
    }

    #[tokio::test]
    async fn test_round_trip_reproduces_rows_after_wipe() -> anyhow::Result<()> {
        let store = MemoryStore::new().with_foreign_keys();
        store.insert(Table::Members, vec![json!({"id": 1, "name": "A"})]);
        store.insert(
            Table::RetroRequest,
            vec![json!({"id": 10, "userId": 1, "title": "X"})],
        );
        store.insert(
            Table::RetroRequestStatusLog,
            vec![json!({"id": 500, "requestId": 10, "status": "PENDING"})],
        );
        store.insert(Table::Usage, vec![json!({"id": "u-1", "label": "Sortie"})]);
        store.insert(
            Table::FinancialDocuments,
            vec![json!({"id": 7, "requestId": 10, "amount": "12345678901234567.89"})],
        );

        let document = capture_snapshot(&store, true).await?;
        let dir = tempfile::tempdir()?;
        let files = crate::snapshot::SnapshotFiles::new(dir.path());
        let written = files.write(&document)?;
        let document = crate::snapshot::SnapshotFiles::read(&written.timestamped)?;
        store.wipe();

        let report = restore_snapshot(&store, document).await;

        assert_eq!(report.skipped(), 0);
        assert_eq!(report.restored(), 5);
        assert_eq!(
            store.rows(Table::FinancialDocuments),
            vec![json!({"id": 7, "requestId": 10, "amount": "12345678901234567.89"})]
        );
        assert_eq!(store.rows(Table::Members), vec![json!({"id": 1, "name": "A"})]);
        assert_eq!(
            store.rows(Table::RetroRequest),
            vec![json!({"id": 10, "userId": 1, "title": "X"})]
        );
        assert_eq!(
            store.rows(Table::RetroRequestStatusLog),
            vec![json!({"id": 500, "requestId": 10, "status": "PENDING"})]
        );
        assert_eq!(store.rows(Table::Usage), vec![json!({"id": "u-1", "label": "Sortie"})]);
        Ok(())
    }

    #[tokio::test]
    async fn test_restoring_twice_yields_same_rows() -> anyhow::Result<()> {
        let rows = || -> anyhow::Result<Vec<Record>> {
            Ok(vec![
                record(Table::Members, json!({"id": 1, "name": "A"}))?,
                record(Table::Members, json!({"id": 2, "name": "B"}))?,
                record(Table::RetroRequest, json!({"id": 10, "userId": 2, "title": "X"}))?,
            ])
        };
        let store = MemoryStore::new().with_foreign_keys();

        restore_snapshot(&store, document(rows()?)).await;
        let once = (store.rows(Table::Members), store.rows(Table::RetroRequest));
        let second = restore_snapshot(&store, document(rows()?)).await;
        let twice = (store.rows(Table::Members), store.rows(Table::RetroRequest));

        assert_eq!(once, twice);
        assert_eq!(twice.0.len(), 2);
        assert_eq!(second.skipped(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_overwrites_stale_row_with_same_id() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.insert(Table::Members, vec![json!({"id": 1, "name": "old"})]);
        let snapshot = || -> anyhow::Result<SnapshotDocument> {
            Ok(document(vec![record(Table::Members, json!({"id": 1, "name": "A"}))?]))
        };

        let first = restore_snapshot(&store, snapshot()?).await;
        assert_eq!(first.restored(), 1);
        assert_eq!(store.rows(Table::Members), vec![json!({"id": 1, "name": "A"})]);

        restore_snapshot(&store, snapshot()?).await;
        assert_eq!(store.rows(Table::Members), vec![json!({"id": 1, "name": "A"})]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_parent_skips_row_and_completes() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let doc = document(vec![record(
            Table::RetroRequest,
            json!({"id": 10, "userId": 1, "title": "X"}),
        )?]);

        let report = restore_snapshot(&store, doc).await;

        let requests = report_for(&report, Table::RetroRequest)?;
        assert_eq!(requests.summary_line(), "retro_request: 0/1 restored, 1 skipped");
        let error = requests.outcomes[0].error.clone().unwrap_or_default();
        assert!(error.contains("userId:1"), "unexpected error: {}", error);
        assert!(error.contains("members"));
        assert!(store.rows(Table::RetroRequest).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_parent_already_in_target_is_accepted() -> anyhow::Result<()> {
        let store = MemoryStore::new().with_foreign_keys();
        store.insert(Table::Members, vec![json!({"id": 1, "name": "A"})]);
        let doc = document(vec![record(
            Table::RetroRequest,
            json!({"id": 10, "userId": 1, "title": "X"}),
        )?]);

        let report = restore_snapshot(&store, doc).await;
        assert_eq!(report_for(&report, Table::RetroRequest)?.restored, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_skipped_rows_do_not_block_later_rows() -> anyhow::Result<()> {
        let store = MemoryStore::new().with_foreign_keys();
        let doc = document(vec![
            record(Table::Members, json!({"id": 1, "name": "A"}))?,
            record(Table::RetroRequest, json!({"id": 10, "userId": 99, "title": "orphan"}))?,
            record(Table::RetroRequest, json!({"id": 11, "userId": 1, "title": "ok"}))?,
            record(Table::RetroRequestFile, json!({"id": 100, "requestId": 10}))?,
            record(Table::RetroRequestFile, json!({"id": 101, "requestId": 11}))?,
            record(Table::Usage, json!({"id": 7, "label": "Sortie"}))?,
        ]);

        let report = restore_snapshot(&store, doc).await;

        let requests = report_for(&report, Table::RetroRequest)?;
        assert_eq!((requests.restored, requests.skipped), (1, 1));
        assert_eq!(requests.outcomes[0].id, RowId::Int(10));
        let files = report_for(&report, Table::RetroRequestFile)?;
        assert_eq!((files.restored, files.skipped), (1, 1));
        assert_eq!(report_for(&report, Table::Usage)?.restored, 1);
        assert_eq!(report.touched_tables(), vec![
            Table::Members,
            Table::RetroRequest,
            Table::RetroRequestFile,
            Table::Usage
        ]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_upsert_is_reported_with_error_text() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let doc = document(vec![
            record(Table::Usage, json!({"id": 1, "tags": ["a"]}))?,
            record(Table::Usage, json!({"id": 2, "label": "fine"}))?,
        ]);

        let report = restore_snapshot(&store, doc).await;

        let usage = report_for(&report, Table::Usage)?;
        assert_eq!(usage.outcomes[0].status, RowStatus::Skipped);
        assert!(
            usage.outcomes[0]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("nested value"))
        );
        assert_eq!(usage.outcomes[1].status, RowStatus::Restored);
        Ok(())
    }
}
