pub(crate) mod command;
pub(crate) mod pipeline;

use anyhow::Result;
use tracing::debug;

use crate::backup::connect_store;
use crate::config::{AppConfig, OperationConfig};
use crate::snapshot::SnapshotFiles;

use command::CommandMigrator;
use pipeline::Pipeline;

/// Public entry point for backup → schema migration → restore.
pub async fn run_migrate_flow(app_config: &AppConfig) -> Result<()> {
    let migrate_config = match &app_config.operation {
        Some(OperationConfig::Migrate(cfg)) => cfg,
        _ => anyhow::bail!("Migrate operation selected but no migrate configuration found."),
    };

    let store = connect_store(&migrate_config.backup.store).await?;
    let migrator = CommandMigrator::new(migrate_config.migration.clone());
    let upload_to = if migrate_config.backup.upload_to_spaces {
        app_config.spaces_config.as_ref()
    } else {
        None
    };

    let mut pipeline = Pipeline::new(
        &store,
        &migrator,
        SnapshotFiles::new(&migrate_config.backup.backup_dir),
    )
    .embed_relations(migrate_config.backup.embed_relations)
    .reset_sequences(migrate_config.restore.reset_sequences)
    .upload_to(upload_to);

    let outcome = pipeline.run().await;
    debug!(stage = ?pipeline.stage(), "migration pipeline finished");
    match outcome {
        Ok(report) => {
            println!(
                "\n🎉 Migration complete: {} rows restored, {} skipped.",
                report.restored(),
                report.skipped()
            );
            Ok(())
        }
        Err(e) => {
            println!("\n❌ Migration pipeline stopped during the {} stage.", e.stage);
            println!("👉 {}", e.remediation());
            Err(e.into())
        }
    }
}
