pub(crate) mod logic;
pub(crate) mod s3_download;
pub(crate) mod verification;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::backup::connect_store;
use crate::config::{AppConfig, OperationConfig, RestoreConfig};
use crate::snapshot::SnapshotFiles;
use crate::store::DataStore;

pub use logic::{RestoreReport, restore_snapshot};

/// Public entry point for the restore process.
pub async fn run_restore_flow(app_config: &AppConfig) -> Result<()> {
    let restore_config = match &app_config.operation {
        Some(OperationConfig::Restore(cfg)) => cfg,
        _ => anyhow::bail!("Restore operation selected but no restore configuration found."),
    };

    let snapshot_path = resolve_source(app_config, restore_config).await?;
    let store = connect_store(&restore_config.store).await?;
    let files = SnapshotFiles::new(&restore_config.backup_dir);
    restore_from_file(&store, &files, &snapshot_path, restore_config.reset_sequences).await?;
    Ok(())
}

/// Compares a snapshot with the live store without writing anything.
pub async fn run_verify_flow(app_config: &AppConfig) -> Result<()> {
    let verify_config = match &app_config.operation {
        Some(OperationConfig::Verify(cfg)) => cfg,
        _ => anyhow::bail!("Verify operation selected but no verify configuration found."),
    };

    let snapshot_path = resolve_source(app_config, verify_config).await?;
    let document = SnapshotFiles::read(&snapshot_path)
        .with_context(|| format!("Failed to read snapshot {}", snapshot_path.display()))?;
    println!(
        "📄 Snapshot {} (created {})",
        snapshot_path.display(),
        document.created_at
    );

    let store = connect_store(&verify_config.store).await?;
    verification::verify_counts(&store, &document.tables.counts()).await?;
    Ok(())
}

/// Finds the snapshot file to read, downloading it first for `s3://` sources.
pub async fn resolve_source(app_config: &AppConfig, restore_config: &RestoreConfig) -> Result<PathBuf> {
    if restore_config.download_from_spaces {
        let spaces_config = app_config
            .spaces_config
            .as_ref()
            .context("S3 download requested but S3 storage is not configured")?;
        let uri = restore_config
            .snapshot_source
            .as_deref()
            .context("S3 download requested without a snapshot URI")?;
        return s3_download::download_snapshot(spaces_config, uri, &restore_config.backup_dir).await;
    }

    let files = SnapshotFiles::new(&restore_config.backup_dir);
    let path = files
        .resolve(restore_config.snapshot_source.as_deref().map(Path::new))
        .context("Cannot determine which snapshot to restore")?;
    println!("📄 Using snapshot {}", path.display());
    Ok(path)
}

/// Reads `snapshot_path` and replays it into `store`, then re-syncs id
/// sequences, verifies counts and writes the restore report.
///
/// Skipped rows are not an error: they are listed in the report.
pub async fn restore_from_file<S: DataStore>(
    store: &S,
    files: &SnapshotFiles,
    snapshot_path: &Path,
    reset_sequences: bool,
) -> Result<RestoreReport> {
    let document = SnapshotFiles::read(snapshot_path)
        .with_context(|| format!("Failed to read snapshot {}", snapshot_path.display()))?;
    let expected_counts = document.tables.counts();
    println!(
        "♻️  Restoring snapshot {} (created {})",
        snapshot_path.display(),
        document.created_at
    );

    let report = restore_snapshot(store, document).await;

    if reset_sequences {
        sync_sequences(store, &report).await;
    }

    if let Err(e) = verification::verify_counts(store, &expected_counts).await {
        warn!("row count verification failed: {:#}", e);
    }

    let report_name = format!("restore-report-{}.json", Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ"));
    let report_bytes = serde_json::to_vec_pretty(&report).context("Failed to serialize restore report")?;
    let report_path = files
        .write_aux(&report_name, &report_bytes)
        .context("Failed to write restore report")?;

    println!(
        "\n✅ Restore completed: {} rows restored, {} skipped",
        report.restored(),
        report.skipped()
    );
    println!("📝 Report saved to: {}", report_path.display());
    Ok(report)
}

async fn sync_sequences<S: DataStore>(store: &S, report: &RestoreReport) {
    for table in report.touched_tables() {
        match store.sync_id_sequence(table).await {
            Ok(Some(next)) => println!("🔢 {} id sequence now starts at {}", table, next),
            Ok(None) => {}
            Err(e) => warn!(table = %table, "failed to reset id sequence: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::perform_backup;
    use crate::schema::Table;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_restore_from_file_writes_report() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let files = SnapshotFiles::new(dir.path());
        let store = MemoryStore::new();
        store.insert(Table::Members, vec![json!({"id": 1, "name": "A"})]);
        store.insert(
            Table::RetroRequest,
            vec![json!({"id": 10, "userId": 1, "title": "X"})],
        );
        let written = perform_backup(&store, &files, true).await?;
        store.wipe();

        let report = restore_from_file(&store, &files, &written.latest, true).await?;

        assert_eq!(report.restored(), 2);
        let report_file = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("restore-report-"))
            })
            .ok_or_else(|| anyhow::anyhow!("restore report not written"))?;
        let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(report_file)?)?;
        assert_eq!(on_disk["tables"][1]["table"], json!("retro_request"));
        assert_eq!(on_disk["tables"][1]["outcomes"][0], json!({"id": 10, "status": "restored"}));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_snapshot_file_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let files = SnapshotFiles::new(dir.path());
        let store = MemoryStore::new();
        let result = restore_from_file(&store, &files, &dir.path().join("nope.json"), false).await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_source_without_backups_reports_none_available() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let app_config = AppConfig::from_raw(Default::default(), None);
        let restore_config = RestoreConfig {
            store: crate::config::StoreConfig {
                database_url: "postgres://localhost/assoc".to_string(),
                max_connections: 1,
            },
            backup_dir: dir.path().join("backups"),
            snapshot_source: None,
            download_from_spaces: false,
            reset_sequences: true,
        };

        let err = match resolve_source(&app_config, &restore_config).await {
            Ok(path) => anyhow::bail!("unexpected snapshot {}", path.display()),
            Err(err) => err,
        };
        assert!(format!("{:#}", err).contains("No backup available"));
        Ok(())
    }
}
