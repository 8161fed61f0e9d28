//! Snapshot backup / schema migration / restore tool
//!
//! Captures the association database as a JSON snapshot, applies schema
//! migrations and replays the snapshot into the migrated schema.

// datasnap/src/main.rs
mod backup;
mod config;
mod errors;
mod migrate;
mod restore;
mod schema;
mod snapshot;
mod store;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{
    AppConfig, DEFAULT_CONFIG_FILE, OperationConfig, load_backup_config_from_json,
    load_migrate_config_from_json, load_restore_config_from_json,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "datasnap", version, about = "Backup, migrate and restore the association database")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write a new snapshot of every tracked table
    Backup,
    /// Replay a snapshot (path or s3:// URI; latest when omitted)
    Restore { snapshot: Option<String> },
    /// Backup, run the schema migration, then restore
    Migrate,
    /// Compare a snapshot's row counts with the database
    Verify { snapshot: Option<String> },
}

/// Main entry point for the snapshot tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let mut app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    let command = match cli.command {
        Some(command) => command,
        None => prompt_command()?,
    };

    let spaces_is_configured = app_config.spaces_config.is_some();

    match command {
        Command::Backup => {
            println!("🚀 Starting Backup Process...");
            let backup_config = load_backup_config_from_json(&app_config.raw_json_config, spaces_is_configured)
                .context("Failed to load backup configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Backup(backup_config));
            backup::run_backup_flow(&app_config)
                .await
                .context("Backup process failed")?;
        }
        Command::Restore { snapshot } => {
            println!("🔄 Starting Restore Process...");
            let restore_config =
                load_restore_config_from_json(&app_config.raw_json_config, snapshot, spaces_is_configured)
                    .context("Failed to load restore configuration from JSON")?;
            println!(
                "Restore target: {}, Snapshot: {}",
                utils::redact_url(&restore_config.store.database_url),
                restore_config.snapshot_source.as_deref().unwrap_or("latest")
            );
            app_config.operation = Some(OperationConfig::Restore(restore_config));
            restore::run_restore_flow(&app_config)
                .await
                .context("Restore process failed")?;
        }
        Command::Migrate => {
            println!("⚙️ Starting Migration Process...");
            let migrate_config = load_migrate_config_from_json(&app_config.raw_json_config, spaces_is_configured)
                .context("Failed to load migrate configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Migrate(migrate_config));
            migrate::run_migrate_flow(&app_config)
                .await
                .context("Migration process failed")?;
        }
        Command::Verify { snapshot } => {
            println!("🔎 Starting Verify Process...");
            let verify_config =
                load_restore_config_from_json(&app_config.raw_json_config, snapshot, spaces_is_configured)
                    .context("Failed to load verify configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Verify(verify_config));
            restore::run_verify_flow(&app_config)
                .await
                .context("Verify process failed")?;
        }
    }
    Ok(())
}

/// Parses an interactive answer: a number or the command name.
fn parse_choice(choice: &str, snapshot: Option<String>) -> Option<Command> {
    match choice.trim() {
        "1" | "backup" => Some(Command::Backup),
        "2" | "restore" => Some(Command::Restore { snapshot }),
        "3" | "migrate" => Some(Command::Migrate),
        "4" | "verify" => Some(Command::Verify { snapshot }),
        _ => None,
    }
}

/// Prompts user to select an operation when none was given on the command line
fn prompt_command() -> Result<Command> {
    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Snapshot (or type 'restore')");
    println!("3. Migrate Schema with Backup/Restore (or type 'migrate')");
    println!("4. Verify Snapshot against Database (or type 'verify')");
    let choice = prompt_line("Enter your choice: ")?;

    let snapshot = if matches!(choice.as_str(), "2" | "restore" | "4" | "verify") {
        Some(prompt_line("Snapshot path or s3:// URI (empty for latest): ")?).filter(|s| !s.is_empty())
    } else {
        None
    };

    match parse_choice(&choice, snapshot) {
        Some(command) => Ok(command),
        None => {
            println!("❌ Invalid choice. Please enter '1' (backup), '2' (restore), '3' (migrate) or '4' (verify).");
            anyhow::bail!("Invalid operation choice");
        }
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::{Write, stdin, stdout};

    print!("{}", prompt);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
