// datasnap/src/migrate/pipeline.rs
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::command::SchemaMigrator;
use crate::backup::{perform_backup, s3_upload};
use crate::config::SpacesConfig;
use crate::restore::{RestoreReport, restore_from_file};
use crate::snapshot::SnapshotFiles;
use crate::store::DataStore;

/// A stage that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    BackingUp,
    MigratingSchema,
    Restoring,
}

impl fmt::Display for FailedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailedStage::BackingUp => "backup",
            FailedStage::MigratingSchema => "schema migration",
            FailedStage::Restoring => "restore",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    BackingUp,
    MigratingSchema,
    Restoring,
    Done,
    Failed(FailedStage),
}

#[derive(Error, Debug)]
#[error("migration pipeline failed during the {stage} stage")]
pub struct PipelineError {
    pub stage: FailedStage,
    /// Snapshot written by the backup stage, if it got that far.
    pub snapshot: Option<PathBuf>,
    #[source]
    pub source: anyhow::Error,
}

impl PipelineError {
    /// What the operator should do next.
    pub fn remediation(&self) -> String {
        let snapshot = self
            .snapshot
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<snapshot>".to_string());
        match self.stage {
            FailedStage::BackingUp => {
                "No schema change was applied. Fix the backup error, then re-run `datasnap migrate`."
                    .to_string()
            }
            FailedStage::MigratingSchema => format!(
                "The snapshot {} is safe on disk. Fix and apply the migration manually, then run `datasnap restore {}`.",
                snapshot, snapshot
            ),
            FailedStage::Restoring => format!(
                "The schema is migrated. Once the cause is fixed, run `datasnap restore {}`.",
                snapshot
            ),
        }
    }
}

/// Backup, then migrate, then restore the snapshot just taken. Stops at the
/// first failing stage; there is no retry and no rollback.
pub struct Pipeline<'a, S, M> {
    store: &'a S,
    migrator: &'a M,
    files: SnapshotFiles,
    embed_relations: bool,
    reset_sequences: bool,
    upload_to: Option<&'a SpacesConfig>,
    stage: Stage,
}

impl<'a, S: DataStore, M: SchemaMigrator> Pipeline<'a, S, M> {
    pub fn new(store: &'a S, migrator: &'a M, files: SnapshotFiles) -> Self {
        Pipeline {
            store,
            migrator,
            files,
            embed_relations: true,
            reset_sequences: true,
            upload_to: None,
            stage: Stage::Idle,
        }
    }

    pub fn embed_relations(mut self, embed: bool) -> Self {
        self.embed_relations = embed;
        self
    }

    pub fn reset_sequences(mut self, reset: bool) -> Self {
        self.reset_sequences = reset;
        self
    }

    pub fn upload_to(mut self, spaces_config: Option<&'a SpacesConfig>) -> Self {
        self.upload_to = spaces_config;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn fail(&mut self, stage: FailedStage, snapshot: Option<PathBuf>, source: anyhow::Error) -> PipelineError {
        self.stage = Stage::Failed(stage);
        PipelineError {
            stage,
            snapshot,
            source,
        }
    }

    pub async fn run(&mut self) -> Result<RestoreReport, PipelineError> {
        println!("\n[1/3] 💾 Backup");
        self.stage = Stage::BackingUp;
        let written = match perform_backup(self.store, &self.files, self.embed_relations).await {
            Ok(written) => written,
            Err(e) => return Err(self.fail(FailedStage::BackingUp, None, e)),
        };
        if let Some(spaces_config) = self.upload_to {
            if let Err(e) = s3_upload::upload_snapshot(spaces_config, &written.timestamped).await {
                return Err(self.fail(FailedStage::BackingUp, Some(written.timestamped), e));
            }
        }

        println!("\n[2/3] 🛠️  Schema migration");
        self.stage = Stage::MigratingSchema;
        if let Err(e) = self.migrator.migrate().await {
            return Err(self.fail(FailedStage::MigratingSchema, Some(written.timestamped), e));
        }

        println!("\n[3/3] ♻️  Restore");
        self.stage = Stage::Restoring;
        let report = match restore_from_file(
            self.store,
            &self.files,
            &written.timestamped,
            self.reset_sequences,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => return Err(self.fail(FailedStage::Restoring, Some(written.timestamped), e)),
        };

        self.stage = Stage::Done;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::cell::Cell;

    /// Stands in for a destructive migration: the store comes back empty.
    struct WipingMigrator<'a> {
        store: &'a MemoryStore,
        calls: Cell<usize>,
    }

    impl SchemaMigrator for WipingMigrator<'_> {
        async fn migrate(&self) -> anyhow::Result<()> {
            self.calls.set(self.calls.get() + 1);
            self.store.wipe();
            Ok(())
        }

        fn describe(&self) -> String {
            "wipe".to_string()
        }
    }

    struct FailingMigrator;

    impl SchemaMigrator for FailingMigrator {
        async fn migrate(&self) -> anyhow::Result<()> {
            anyhow::bail!("migration 20260101_add_column failed")
        }

        fn describe(&self) -> String {
            "fail".to_string()
        }
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new().with_foreign_keys();
        store.insert(Table::Members, vec![json!({"id": 1, "name": "A"})]);
        store.insert(
            Table::RetroRequest,
            vec![json!({"id": 10, "userId": 1, "title": "X"})],
        );
        store
    }

    #[tokio::test]
    async fn test_successful_run_restores_data_after_migration() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = seeded_store();
        let migrator = WipingMigrator {
            store: &store,
            calls: Cell::new(0),
        };

        let mut pipeline = Pipeline::new(&store, &migrator, SnapshotFiles::new(dir.path()));
        assert_eq!(pipeline.stage(), Stage::Idle);
        let report = pipeline.run().await?;

        assert_eq!(pipeline.stage(), Stage::Done);
        assert_eq!(migrator.calls.get(), 1);
        assert_eq!(report.restored(), 2);
        assert_eq!(
            store.rows(Table::RetroRequest),
            vec![json!({"id": 10, "userId": 1, "title": "X"})]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_migration_failure_stops_before_restore() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let files = SnapshotFiles::new(dir.path());
        let store = seeded_store();

        let mut pipeline = Pipeline::new(&store, &FailingMigrator, files.clone());
        let err = match pipeline.run().await {
            Ok(_) => anyhow::bail!("pipeline should fail at the migration stage"),
            Err(err) => err,
        };

        assert_eq!(pipeline.stage(), Stage::Failed(FailedStage::MigratingSchema));
        assert_eq!(err.stage, FailedStage::MigratingSchema);
        let snapshot = err
            .snapshot
            .clone()
            .ok_or_else(|| anyhow::anyhow!("snapshot path missing"))?;
        assert!(snapshot.exists());
        assert!(err.remediation().contains("datasnap restore"));
        assert!(format!("{:#}", anyhow::Error::new(err)).contains("20260101_add_column"));

        let reports = std::fs::read_dir(files.dir())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("restore-report-"))
            .count();
        assert_eq!(reports, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_failure_never_runs_migration() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = seeded_store().failing_fetch_on(Table::Usage);
        let migrator = WipingMigrator {
            store: &store,
            calls: Cell::new(0),
        };

        let mut pipeline = Pipeline::new(&store, &migrator, SnapshotFiles::new(dir.path()));
        let result = pipeline.run().await;

        assert!(result.is_err());
        assert_eq!(pipeline.stage(), Stage::Failed(FailedStage::BackingUp));
        assert_eq!(migrator.calls.get(), 0);
        assert_eq!(store.rows(Table::Members).len(), 1);
        Ok(())
    }
}
