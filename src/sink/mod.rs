//! Result sink trait and implementations.
//!
//! A sink persists the result list of a run. The same operation serves the normal
//! end-of-run save and the emergency save after an interruption; only the
//! suggested name differs.

pub mod csv_file;

use std::path::PathBuf;

use crate::model::SearchResult;

/// Errors that can occur while persisting results.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {message}")]
    WriteError { path: PathBuf, message: String },

    #[error("Failed to serialize: {0}")]
    SerializeError(String),

    #[error("Invalid output name: {0}")]
    InvalidName(String),
}

/// Trait for result sinks (CSV files, test doubles, etc.).
pub trait ResultSink: Send + Sync {
    /// Persist `results` in order and return where they went.
    ///
    /// `suggested_name` is a file stem chosen by the caller; `None` lets the
    /// sink pick its default name.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the results cannot be written.
    fn save(
        &self,
        results: &[SearchResult],
        suggested_name: Option<&str>,
    ) -> Result<PathBuf, SinkError>;
}
