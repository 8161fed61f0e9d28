// datasnap/src/snapshot/mod.rs
//! Snapshot documents and the directory they are kept in.

pub(crate) mod document;
pub(crate) mod files;

pub use document::{SnapshotDocument, SnapshotTables};
pub use files::{SnapshotFiles, WrittenSnapshot};
