//! Error taxonomy shared by the graph, the semantic index and the indexer.
use std::path::PathBuf;

use thiserror::Error;

use crate::embedder::EmbedderError;

/// Errors surfaced by the memory layer.
///
/// Missing symbols or files are not errors: read queries return `Option`
/// or an empty collection instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Embedding backend, SQLite or graph persistence failure.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A single file could not be read or parsed.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("another sync holds the project lock at {}", .0.display())]
    Locked(PathBuf),

    #[error("no project found at {}", .0.display())]
    ProjectNotFound(PathBuf),
}

impl Error {
    pub fn parse(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(format!("sqlite: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("json: {e}"))
    }
}

impl From<EmbedderError> for Error {
    fn from(e: EmbedderError) -> Self {
        Self::Storage(format!("embedding: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
