use std::path::PathBuf;

use thiserror::Error;

use crate::schema::Table;

/// Failures raised by a data-access implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid column identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unexpected row shape in {table}: {message}")]
    UnexpectedShape { table: Table, message: String },

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Failures around reading, writing and locating snapshot documents.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Snapshot document has no `tables` object")]
    MissingTables,

    #[error("Snapshot format version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Snapshot file not found: {0}")]
    NotFound(PathBuf),

    #[error("No backup available in {0}")]
    NoBackupAvailable(PathBuf),

    #[error("Malformed row in {table}: {message}")]
    MalformedRow { table: Table, message: String },

    #[error("Snapshot file already exists and will not be overwritten: {0}")]
    AlreadyExists(PathBuf),
}

impl SnapshotError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }
}
