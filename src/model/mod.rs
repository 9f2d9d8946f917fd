//! Result and run statistics types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::query::SearchTerm;
use crate::sink::SinkError;

/// One successful search outcome for one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    keyword: SearchTerm,
    title: String,
    url: String,
    snippet: String,
    retrieved_at: DateTime<Utc>,
}

impl SearchResult {
    #[must_use]
    pub fn new(
        keyword: SearchTerm,
        title: String,
        url: String,
        snippet: String,
        retrieved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            keyword,
            title,
            url,
            snippet,
            retrieved_at,
        }
    }

    #[must_use]
    pub fn keyword(&self) -> &SearchTerm {
        &self.keyword
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    #[must_use]
    pub fn retrieved_at(&self) -> DateTime<Utc> {
        self.retrieved_at
    }
}

/// Why a term ended up in the failed list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The call succeeded but the API returned no items.
    NoResult,
    /// Every attempt failed with a retryable error.
    RetriesExhausted { attempts: u32, last_error: String },
    /// The API refused the query; retrying would not help.
    Rejected { detail: String },
    /// The failure also aborted the run.
    Fatal { detail: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResult => f.write_str("no result"),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            Self::Rejected { detail } => write!(f, "rejected: {detail}"),
            Self::Fatal { detail } => write!(f, "fatal: {detail}"),
        }
    }
}

/// A term that ultimately produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTerm {
    pub term: SearchTerm,
    pub reason: FailureReason,
}

/// Aggregate counters for one run.
///
/// `succeeded + failed <= total_requested` holds at every point; `no_result`,
/// `exhausted`, `rejected` and `fatal` break `failed` down by cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub total_requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub no_result: usize,
    pub exhausted: usize,
    pub rejected: usize,
    pub fatal: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub interrupted: bool,
}

impl RunStatistics {
    #[must_use]
    pub fn new(total_requested: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total_requested,
            succeeded: 0,
            failed: 0,
            no_result: 0,
            exhausted: 0,
            rejected: 0,
            fatal: 0,
            started_at,
            ended_at: None,
            interrupted: false,
        }
    }

    /// Terms that reached a terminal outcome.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Terms never attempted or abandoned mid-retry.
    #[must_use]
    pub fn unattempted(&self) -> usize {
        self.total_requested - self.processed()
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.total_requested == 0 {
            return 100.0;
        }
        self.processed() as f64 / self.total_requested as f64 * 100.0
    }

    /// Share of processed terms that succeeded.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.processed() == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.processed() as f64 * 100.0
    }

    #[must_use]
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }

    pub(crate) fn record_failure(&mut self, reason: &FailureReason) {
        self.failed += 1;
        match reason {
            FailureReason::NoResult => self.no_result += 1,
            FailureReason::RetriesExhausted { .. } => self.exhausted += 1,
            FailureReason::Rejected { .. } => self.rejected += 1,
            FailureReason::Fatal { .. } => self.fatal += 1,
        }
    }
}

/// Failures that make every remaining term unattemptable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FatalRunError {
    #[error("Connectivity check failed: {0}")]
    Connectivity(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("API quota exhausted: {0}")]
    QuotaExhausted(String),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Every term was processed.
    Completed,
    /// Cancellation was observed before the last term finished.
    Interrupted,
    /// A fatal error aborted the run.
    Fatal(FatalRunError),
}

/// Which sink operation a save went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveKind {
    Normal,
    Emergency,
}

/// What happened when the results were handed to the sink.
#[derive(Debug)]
pub enum SaveStatus {
    /// Nothing to save.
    Skipped,
    Saved { kind: SaveKind, path: PathBuf },
    Failed { kind: SaveKind, error: SinkError },
}

/// The terminal summary of a run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Successful results in input order.
    pub results: Vec<SearchResult>,
    pub failed: Vec<FailedTerm>,
    /// A term cancelled in the middle of its retry loop.
    pub abandoned: Option<SearchTerm>,
    pub statistics: RunStatistics,
    pub termination: Termination,
    pub save: SaveStatus,
}

impl RunOutcome {
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.termination == Termination::Interrupted
    }

    #[must_use]
    pub fn fatal_error(&self) -> Option<&FatalRunError> {
        match &self.termination {
            Termination::Fatal(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn saved_path(&self) -> Option<&PathBuf> {
        match &self.save {
            SaveStatus::Saved { path, .. } => Some(path),
            _ => None,
        }
    }
}
