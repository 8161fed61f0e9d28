// datasnap/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "datasnap.json";
const DEFAULT_BACKUP_DIR: &str = "backups";
const DEFAULT_MIGRATION_PROGRAM: &str = "npx";
const DEFAULT_MIGRATION_ARGS: &[&str] = &["prisma", "migrate", "deploy"];

// Structs for deserializing datasnap.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonMigrationConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub embed_relations: Option<bool>,
    pub max_connections: Option<u32>,
    pub reset_sequences: Option<bool>,
    pub migration: Option<JsonMigrationConfig>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub store: StoreConfig,
    pub backup_dir: PathBuf,
    pub embed_relations: bool,
    pub upload_to_spaces: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub store: StoreConfig,
    pub backup_dir: PathBuf,
    /// Explicit snapshot path or `s3://` URI; `None` means the latest pointer.
    pub snapshot_source: Option<String>,
    pub download_from_spaces: bool,
    pub reset_sequences: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MigrateConfig {
    pub backup: BackupConfig,
    pub migration: MigrationCommand,
    pub restore: RestoreConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub operation: Option<OperationConfig>,
    pub spaces_config: Option<SpacesConfig>,
    pub raw_json_config: RawJsonConfig,
}

#[derive(Debug, Clone)]
pub enum OperationConfig {
    Backup(BackupConfig),
    Restore(RestoreConfig),
    Migrate(MigrateConfig),
    Verify(RestoreConfig),
}

impl AppConfig {
    /// Loads `config_path`; a missing file means "all defaults". `DATABASE_URL`
    /// from the environment (or `.env`) fills in an absent `database_url`.
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let raw_json_config: RawJsonConfig = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            println!(
                "ℹ️  No config file at {}, using defaults and DATABASE_URL.",
                config_path.display()
            );
            RawJsonConfig::default()
        };

        Ok(Self::from_raw(raw_json_config, std::env::var("DATABASE_URL").ok()))
    }

    pub fn from_raw(mut raw_json_config: RawJsonConfig, env_database_url: Option<String>) -> Self {
        if raw_json_config
            .database_url
            .as_ref()
            .is_none_or(|url| url.trim().is_empty())
        {
            raw_json_config.database_url = env_database_url.filter(|url| !url.trim().is_empty());
        }

        let spaces_config = raw_json_config
            .s3_storage
            .as_ref()
            .and_then(spaces_config_from_raw);

        AppConfig {
            operation: None, // To be filled by main after parsing CLI args
            spaces_config,
            raw_json_config,
        }
    }
}

fn spaces_config_from_raw(s3_raw: &JsonS3StorageConfig) -> Option<SpacesConfig> {
    if let (Some(bucket), Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
        s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
        s3_raw.region.as_ref().filter(|s| !s.is_empty()),
        s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
        s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
        s3_raw.endpoint_url.as_ref().filter(|s| !s.is_empty()),
    ) {
        Some(SpacesConfig {
            bucket_name: bucket.clone(),
            region: region.clone(),
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            endpoint_url: endpoint.clone(),
            folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
        })
    } else {
        if s3_raw.bucket_name.is_some()
            || s3_raw.region.is_some()
            || s3_raw.access_key_id.is_some()
            || s3_raw.secret_access_key.is_some()
            || s3_raw.endpoint_url.is_some()
        {
            // Only warn if some S3 fields were provided but were incomplete/empty
            println!("⚠️  s3_storage is present in the config but some required fields (bucket_name, region, access_key_id, secret_access_key, endpoint_url) are missing or empty. S3 upload/download is disabled.");
        }
        None
    }
}

fn load_store_config(raw_config: &RawJsonConfig, operation: &str) -> Result<StoreConfig> {
    let database_url = raw_config
        .database_url
        .as_ref()
        .with_context(|| {
            format!(
                "database_url must be set in the config file (or DATABASE_URL in the environment) for {}",
                operation
            )
        })?
        .clone();
    let max_connections = raw_config.max_connections.unwrap_or(1);
    if max_connections == 0 {
        anyhow::bail!("max_connections must be at least 1.");
    }
    Ok(StoreConfig {
        database_url,
        max_connections,
    })
}

fn backup_dir(raw_config: &RawJsonConfig) -> Result<PathBuf> {
    let dir = raw_config
        .backup_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
    if dir.as_os_str().is_empty() {
        return Err(anyhow::anyhow!("backup_dir cannot be empty in the config file."));
    }
    Ok(dir)
}

pub fn load_backup_config_from_json(
    raw_config: &RawJsonConfig,
    spaces_is_configured: bool,
) -> Result<BackupConfig> {
    Ok(BackupConfig {
        store: load_store_config(raw_config, "backup")?,
        backup_dir: backup_dir(raw_config)?,
        embed_relations: raw_config.embed_relations.unwrap_or(true),
        upload_to_spaces: spaces_is_configured, // Enable upload if S3 is generally configured
    })
}

pub fn load_restore_config_from_json(
    raw_config: &RawJsonConfig,
    snapshot_source: Option<String>,
    spaces_is_configured: bool,
) -> Result<RestoreConfig> {
    let snapshot_source = snapshot_source.filter(|s| !s.trim().is_empty());
    let download_from_spaces = snapshot_source
        .as_deref()
        .is_some_and(|source| source.starts_with("s3://"));
    if download_from_spaces && !spaces_is_configured {
        return Err(anyhow::anyhow!(
            "Snapshot source is an S3 URI, but S3 storage (s3_storage) is not fully configured or is missing required fields."
        ));
    }

    Ok(RestoreConfig {
        store: load_store_config(raw_config, "restore")?,
        backup_dir: backup_dir(raw_config)?,
        snapshot_source,
        download_from_spaces,
        reset_sequences: raw_config.reset_sequences.unwrap_or(true),
    })
}

pub fn load_migrate_config_from_json(
    raw_config: &RawJsonConfig,
    spaces_is_configured: bool,
) -> Result<MigrateConfig> {
    let migration_raw = raw_config.migration.clone().unwrap_or_default();
    let program = migration_raw
        .program
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MIGRATION_PROGRAM.to_string());
    let args = migration_raw
        .args
        .unwrap_or_else(|| DEFAULT_MIGRATION_ARGS.iter().map(|a| a.to_string()).collect());

    Ok(MigrateConfig {
        backup: load_backup_config_from_json(raw_config, spaces_is_configured)?,
        migration: MigrationCommand {
            program,
            args,
            working_dir: migration_raw.working_dir,
        },
        // The pipeline restores the file its own backup stage just wrote.
        restore: load_restore_config_from_json(raw_config, None, spaces_is_configured)?,
    })
}
