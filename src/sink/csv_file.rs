//! CSV file result sink.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::model::{FailedTerm, FatalRunError, RunOutcome, RunStatistics, SearchResult, Termination};
use crate::query::{DroppedLine, SearchTerm};
use crate::sink::{ResultSink, SinkError};

/// Writes results as CSV files into an output directory.
pub struct CsvResultSink {
    directory: PathBuf,
    prefix: String,
    clock: Arc<dyn Clock>,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    results_file: &'a Path,
    termination: &'static str,
    fatal_error: Option<&'a FatalRunError>,
    statistics: &'a RunStatistics,
    success_rate: f64,
    elapsed_seconds: Option<f64>,
    failed: &'a [FailedTerm],
    abandoned: Option<&'a SearchTerm>,
    dropped: &'a [DroppedLine],
}

impl CsvResultSink {
    /// Create a sink writing into `directory`, naming files `{prefix}_{timestamp}.csv`
    /// unless the caller suggests a name.
    ///
    /// Timestamps are UTC, like emergency save names, so every file of a run sorts
    /// together.
    #[must_use]
    pub fn new(directory: PathBuf, prefix: String) -> Self {
        Self {
            directory,
            prefix,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn ensure_directory(&self) -> Result<(), SinkError> {
        fs::create_dir_all(&self.directory).map_err(|source| SinkError::CreateDir {
            path: self.directory.clone(),
            source,
        })
    }

    fn file_stem(&self, suggested_name: Option<&str>) -> Result<String, SinkError> {
        let Some(name) = suggested_name else {
            return Ok(format!(
                "{}_{}",
                self.prefix,
                self.clock.now().format("%Y%m%d_%H%M%S")
            ));
        };

        let name = name.trim();
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(SinkError::InvalidName(name.to_string()));
        }

        Ok(name.strip_suffix(".csv").unwrap_or(name).to_string())
    }

    /// Write a JSON summary next to a results file.
    ///
    /// The summary is named after the results file with a `_summary.json` suffix.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the summary cannot be serialized or written.
    pub fn write_summary(
        &self,
        outcome: &RunOutcome,
        dropped: &[DroppedLine],
        results_path: &Path,
    ) -> Result<PathBuf, SinkError> {
        self.ensure_directory()?;

        let stem = results_path
            .file_stem()
            .map_or_else(|| self.prefix.clone(), |s| s.to_string_lossy().into_owned());
        let path = unique_path(&self.directory, &format!("{stem}_summary"), "json");

        let (termination, fatal_error) = match &outcome.termination {
            Termination::Completed => ("completed", None),
            Termination::Interrupted => ("interrupted", None),
            Termination::Fatal(e) => ("fatal", Some(e)),
        };

        #[allow(clippy::cast_precision_loss)]
        let elapsed_seconds = outcome
            .statistics
            .elapsed()
            .map(|d| d.num_milliseconds() as f64 / 1000.0);

        let summary = RunSummary {
            results_file: results_path,
            termination,
            fatal_error,
            statistics: &outcome.statistics,
            success_rate: outcome.statistics.success_rate(),
            elapsed_seconds,
            failed: &outcome.failed,
            abandoned: outcome.abandoned.as_ref(),
            dropped,
        };

        let contents = serde_json::to_string_pretty(&summary)
            .map_err(|e| SinkError::SerializeError(e.to_string()))?;

        fs::write(&path, contents).map_err(|e| SinkError::WriteError {
            path: path.clone(),
            message: e.to_string(),
        })?;

        info!(path = %path.display(), "Wrote run summary");
        Ok(path)
    }
}

impl ResultSink for CsvResultSink {
    fn save(
        &self,
        results: &[SearchResult],
        suggested_name: Option<&str>,
    ) -> Result<PathBuf, SinkError> {
        let stem = self.file_stem(suggested_name)?;
        self.ensure_directory()?;
        let path = unique_path(&self.directory, &stem, "csv");

        let write_error = |message: String| SinkError::WriteError {
            path: path.clone(),
            message,
        };

        let mut writer = ::csv::Writer::from_path(&path).map_err(|e| write_error(e.to_string()))?;
        for result in results {
            writer
                .serialize(result)
                .map_err(|e| write_error(e.to_string()))?;
        }
        writer.flush().map_err(|e| write_error(e.to_string()))?;

        info!(path = %path.display(), count = results.len(), "Saved results");
        Ok(path)
    }
}

/// `directory/stem.ext`, or `directory/stem_N.ext` for the first free `N`.
fn unique_path(directory: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = directory.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }

    (1..)
        .map(|n| directory.join(format!("{stem}_{n}.{extension}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
