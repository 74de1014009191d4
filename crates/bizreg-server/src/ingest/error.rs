//! Job-level import errors
//!
//! Only these surface as failures of a whole import. Everything that concerns
//! a single row is a [`RowError`](super::types::RowError) folded into the
//! job statistics instead.

use thiserror::Error;

use super::types::InvalidTransition;
use crate::store::StoreError;

/// The upload cannot be imported at all; no job is started.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("No file field found in multipart data")]
    MissingFile,

    #[error("Unsupported upload type '{0}': only CSV files are accepted")]
    UnsupportedContentType(String),

    #[error("Upload exceeds the maximum size of {max_bytes} bytes")]
    TooLarge { max_bytes: u64 },

    #[error("Uploaded file is empty")]
    Empty,

    #[error("CSV header is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Uploaded file could not be read: {0}")]
    Unreadable(String),
}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        FileError::Unreadable(err.to_string())
    }
}

/// The byte stream broke mid-import (I/O failure, truncated upload).
#[derive(Debug, Error)]
#[error("Stream failed after row {last_row}: {message}")]
pub struct StreamError {
    /// Last data row successfully read before the failure
    pub last_row: u64,
    pub message: String,
}

/// Why a running job ended in `Failed`
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Failed to load existing company numbers: {0}")]
    KeyPreload(#[source] StoreError),

    #[error("Failed to record job state: {0}")]
    JobRecord(#[source] StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    /// The server is shutting down
    #[error("Import interrupted after row {last_row}")]
    Interrupted { last_row: u64 },
}
