// datasnap/src/migrate/command.rs
use anyhow::{Context, Result};
use tokio::process::Command;

use crate::config::MigrationCommand;
use crate::utils::find_executable;

/// Applies pending schema changes to the target database.
#[allow(async_fn_in_trait)]
pub trait SchemaMigrator {
    async fn migrate(&self) -> Result<()>;

    /// Human-readable form of what `migrate` runs.
    fn describe(&self) -> String;
}

/// Runs an external migration tool (by default `npx prisma migrate deploy`).
#[derive(Debug, Clone)]
pub struct CommandMigrator {
    command: MigrationCommand,
}

impl CommandMigrator {
    pub fn new(command: MigrationCommand) -> Self {
        CommandMigrator { command }
    }
}

impl SchemaMigrator for CommandMigrator {
    async fn migrate(&self) -> Result<()> {
        let program_path = find_executable(&self.command.program)?;
        println!("🛠️  Running {}", self.describe());

        let mut cmd = Command::new(&program_path);
        cmd.args(&self.command.args);
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        // stdio is inherited so the tool's own output reaches the operator.
        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to start {}", self.describe()))?;

        if !status.success() {
            return Err(anyhow::anyhow!(
                "{} failed with status: {}",
                self.describe(),
                status
            ));
        }
        println!("✅ Schema migration applied");
        Ok(())
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.command.program.clone()];
        parts.extend(self.command.args.iter().cloned());
        let line = parts.join(" ");
        match &self.command.working_dir {
            Some(dir) => format!("`{}` in {}", line, dir.display()),
            None => format!("`{}`", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandMigrator {
        CommandMigrator::new(MigrationCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: None,
        })
    }

    #[tokio::test]
    async fn test_zero_exit_succeeds() -> anyhow::Result<()> {
        shell("exit 0").migrate().await
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_fatal() {
        let result = shell("exit 3").migrate().await;
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("failed with status"), "got: {}", message);
    }

    #[tokio::test]
    async fn test_missing_program_is_reported() {
        let migrator = CommandMigrator::new(MigrationCommand {
            program: "datasnap-no-such-migrator".to_string(),
            args: vec![],
            working_dir: None,
        });
        assert!(migrator.migrate().await.is_err());
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let migrator = CommandMigrator::new(MigrationCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "touch migrated.marker".to_string()],
            working_dir: Some(dir.path().to_path_buf()),
        });
        migrator.migrate().await?;
        assert!(dir.path().join("migrated.marker").exists());
        Ok(())
    }

    #[test]
    fn test_describe_lists_program_and_args() {
        let migrator = CommandMigrator::new(MigrationCommand {
            program: "npx".to_string(),
            args: vec!["prisma".into(), "migrate".into(), "deploy".into()],
            working_dir: None,
        });
        assert_eq!(migrator.describe(), "`npx prisma migrate deploy`");
    }
}
