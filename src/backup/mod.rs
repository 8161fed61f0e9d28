pub(crate) mod logic;
pub(crate) mod s3_upload;

use anyhow::{Context, Result};

use crate::config::{AppConfig, BackupConfig};
use crate::snapshot::{SnapshotFiles, WrittenSnapshot};
use crate::store::PgStore;
use crate::utils::redact_url;

pub use logic::perform_backup;

/// Public entry point for the backup process.
pub async fn run_backup_flow(app_config: &AppConfig) -> Result<()> {
    let backup_config = match &app_config.operation {
        Some(crate::config::OperationConfig::Backup(cfg)) => cfg,
        _ => anyhow::bail!("Backup operation selected but no backup configuration found."),
    };

    let store = connect_store(&backup_config.store).await?;
    backup_with_store(app_config, backup_config, &store).await?;
    Ok(())
}

/// Runs the backup stage against an open store, uploading the snapshot when
/// S3 storage is configured.
pub async fn backup_with_store(
    app_config: &AppConfig,
    backup_config: &BackupConfig,
    store: &PgStore,
) -> Result<WrittenSnapshot> {
    let files = SnapshotFiles::new(&backup_config.backup_dir);
    let written = perform_backup(store, &files, backup_config.embed_relations).await?;

    if backup_config.upload_to_spaces {
        if let Some(spaces_config) = &app_config.spaces_config {
            s3_upload::upload_snapshot(spaces_config, &written.timestamped)
                .await
                .with_context(|| {
                    format!(
                        "Snapshot upload failed; the local snapshot {} is intact",
                        written.timestamped.display()
                    )
                })?;
        }
    }
    Ok(written)
}

pub(crate) async fn connect_store(store_config: &crate::config::StoreConfig) -> Result<PgStore> {
    println!("🔌 Connecting to {}", redact_url(&store_config.database_url));
    let store = PgStore::connect(&store_config.database_url, store_config.max_connections)
        .await
        .context("Failed to connect to the database")?;
    store
        .check_connection()
        .await
        .context("❌ Cannot proceed - database connection check failed")?;
    println!("✅ Database connection established");
    Ok(store)
}
