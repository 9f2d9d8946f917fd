//! Search client trait and error classification.

pub mod google;

use thiserror::Error;

use crate::query::SearchTerm;

/// How the orchestrator should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient; the same call may succeed if retried.
    Retryable,
    /// This term failed for good; other terms may still succeed.
    NonRetryable,
    /// No later term can succeed either; the run must stop.
    Fatal,
}

/// Errors that can occur while calling the search API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Query rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),
}

impl SearchError {
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::RateLimited(_) | Self::Server { .. } => {
                FailureClass::Retryable
            }
            Self::Rejected { .. } | Self::Decode(_) => FailureClass::NonRetryable,
            Self::Authentication(_) | Self::QuotaExhausted(_) => FailureClass::Fatal,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }
}

/// The top result returned for a term, before it is stamped into a
/// [`SearchResult`](crate::model::SearchResult).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Trait for search API clients (Google Custom Search, test doubles, etc.).
///
/// Calls are made one at a time; implementations bound each call by their own
/// timeout.
pub trait SearchClient: Send + Sync {
    /// Check that the API is reachable and the credentials are accepted.
    ///
    /// # Errors
    ///
    /// Returns `SearchError` describing why the API cannot be used.
    fn validate_connectivity(&self) -> Result<(), SearchError>;

    /// Run one query and return its top hit, or `None` if the API had no result.
    ///
    /// # Errors
    ///
    /// Returns `SearchError`; its [`class`](SearchError::class) decides whether
    /// the call is retried.
    fn search_one(&self, term: &SearchTerm) -> Result<Option<SearchHit>, SearchError>;
}
