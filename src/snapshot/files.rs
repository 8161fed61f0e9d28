// datasnap/src/snapshot/files.rs
use regex::Regex;
use serde_json::{json, Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::NamedTempFile;

use super::document::SnapshotDocument;
use crate::errors::SnapshotError;

pub const LATEST_FILE_NAME: &str = "backup-latest.json";
pub const STATS_FILE_NAME: &str = "backup-stats.json";

/// Timestamped snapshot names: ISO-style (`backup-2026-10-19T08-00-00-000Z.json`)
/// and the older epoch-millisecond form (`backup-1712345678901.json`).
static TIMESTAMPED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^backup-\d[0-9TZ-]*\.json$").expect("snapshot name pattern is valid"));

/// Paths produced by one backup run.
#[derive(Debug, Clone)]
pub struct WrittenSnapshot {
    pub timestamped: PathBuf,
    pub latest: PathBuf,
    pub stats: PathBuf,
}

/// The directory holding snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotFiles {
    dir: PathBuf,
}

impl SnapshotFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SnapshotFiles { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE_NAME)
    }

    pub fn timestamped_name(doc: &SnapshotDocument) -> String {
        doc.created_at
            .format("backup-%Y-%m-%dT%H-%M-%S-%3fZ.json")
            .to_string()
    }

    /// Persists `doc` as a new timestamped file, then overwrites the latest
    /// pointer and the stats file. Both snapshot files get the same bytes.
    pub fn write(&self, doc: &SnapshotDocument) -> Result<WrittenSnapshot, SnapshotError> {
        fs::create_dir_all(&self.dir).map_err(|e| SnapshotError::io(&self.dir, e))?;

        let bytes = doc.to_pretty_json()?;

        let timestamped = self.dir.join(Self::timestamped_name(doc));
        self.write_file(&timestamped, &bytes, false)?;

        let latest = self.latest_path();
        self.write_file(&latest, &bytes, true)?;

        let counts: Map<String, Value> = doc
            .tables
            .counts()
            .into_iter()
            .map(|(table, count)| (table.name().to_string(), Value::from(count)))
            .collect();
        let stats_bytes = serde_json::to_vec_pretty(&json!({
            "timestamp": doc.created_at,
            "file": timestamped.file_name().map(|n| n.to_string_lossy().into_owned()),
            "tables": counts,
        }))?;
        let stats = self.dir.join(STATS_FILE_NAME);
        self.write_file(&stats, &stats_bytes, true)?;

        Ok(WrittenSnapshot {
            timestamped,
            latest,
            stats,
        })
    }

    /// Writes any auxiliary file (e.g. a restore report) next to the snapshots.
    pub fn write_aux(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir).map_err(|e| SnapshotError::io(&self.dir, e))?;
        let path = self.dir.join(file_name);
        self.write_file(&path, bytes, true)?;
        Ok(path)
    }

    /// Writes through a temp file in the same directory so a reader never
    /// sees a half-written snapshot.
    fn write_file(&self, path: &Path, bytes: &[u8], overwrite: bool) -> Result<(), SnapshotError> {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| SnapshotError::io(&self.dir, e))?;
        tmp.write_all(bytes).map_err(|e| SnapshotError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| SnapshotError::io(tmp.path(), e))?;

        let persisted = if overwrite {
            tmp.persist(path)
        } else {
            tmp.persist_noclobber(path)
        };
        match persisted {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SnapshotError::AlreadyExists(path.to_path_buf()))
            }
            Err(e) => Err(SnapshotError::io(path, e.error)),
        }
    }

    /// Historical snapshot files, oldest first.
    pub fn list_timestamped(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|e| SnapshotError::io(&self.dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| TIMESTAMPED_NAME.is_match(n))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Picks the file a restore should read: the explicit path when given,
    /// else the latest pointer, else the greatest timestamped file.
    pub fn resolve(&self, explicit: Option<&Path>) -> Result<PathBuf, SnapshotError> {
        if let Some(path) = explicit {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(SnapshotError::NotFound(path.to_path_buf()))
            };
        }

        let latest = self.latest_path();
        if latest.is_file() {
            return Ok(latest);
        }

        self.list_timestamped()?
            .pop()
            .ok_or_else(|| SnapshotError::NoBackupAvailable(self.dir.clone()))
    }

    pub fn read(path: &Path) -> Result<SnapshotDocument, SnapshotError> {
        let bytes = fs::read(path).map_err(|e| SnapshotError::io(path, e))?;
        SnapshotDocument::from_slice(&bytes)
    }
}
