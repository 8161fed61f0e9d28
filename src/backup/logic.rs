// datasnap/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::Utc;

use crate::schema::{Record, Relation, Table};
use crate::snapshot::{SnapshotDocument, SnapshotFiles, SnapshotTables, WrittenSnapshot};
use crate::store::DataStore;

/// Reads every tracked table into one in-memory document.
///
/// Tables are fetched one at a time in dependency order, each as a full scan.
/// The first failing fetch aborts the capture: an incomplete snapshot must
/// never reach disk, since restore trusts it to be complete.
pub async fn capture_snapshot<S: DataStore>(store: &S, embed_relations: bool) -> Result<SnapshotDocument> {
    let mut tables = SnapshotTables::default();

    for table in Table::ALL {
        let include: &[Relation] = if embed_relations { table.embedded() } else { &[] };
        println!("💾 Backing up {}...", table);

        let rows = store
            .find_many(table, include)
            .await
            .with_context(|| format!("Failed to fetch rows of table {}", table))?;

        let fetched = rows.len();
        for (index, row) in rows.into_iter().enumerate() {
            let record = Record::from_value(table, row)
                .with_context(|| format!("Row {} of table {} cannot be captured", index, table))?;
            tables.push(record);
        }
        println!("   ✅ {} rows", fetched);
    }

    Ok(SnapshotDocument::new(Utc::now(), tables))
}

/// Captures a snapshot and persists it (timestamped file + latest pointer).
pub async fn perform_backup<S: DataStore>(
    store: &S,
    files: &SnapshotFiles,
    embed_relations: bool,
) -> Result<WrittenSnapshot> {
    let document = capture_snapshot(store, embed_relations).await?;

    let written = files
        .write(&document)
        .with_context(|| format!("Failed to write snapshot files to {}", files.dir().display()))?;

    println!("\n📊 Backup stats:");
    for (table, count) in document.tables.counts() {
        println!("  - {}: {} records", table, count);
    }
    println!("✅ Backup saved to: {}", written.timestamped.display());
    println!("✅ Latest backup saved to: {}", written.latest.display());
    println!("📊 Stats saved to: {}", written.stats.display());
    Ok(written)
}
