//! The batch run engine.
//!
//! An [`Orchestrator`] drives one search call per term, strictly in input order
//! and one call at a time. Between terms it waits the pacing interval; within a
//! term it retries transient failures according to a [`RetryPolicy`]. The
//! cancellation token is checked before every term and before every retry, and
//! all waits are cut short by it.
//!
//! Every run ends in exactly one of three ways:
//!
//! - all terms processed: results go through the normal save,
//! - cancellation observed: results go through the emergency save,
//! - a fatal error (failed connectivity check, rejected credentials, exhausted
//!   quota): results go through the emergency save.
//!
//! ```text
//! Idle -> ConnectivityCheck -> Processing -> Completed | Interrupted | FatalError
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::client::{FailureClass, SearchClient, SearchError, SearchHit};
use crate::clock::{Clock, SystemClock};
use crate::model::{
    FailedTerm, FailureReason, FatalRunError, RunOutcome, RunStatistics, SaveKind, SaveStatus,
    SearchResult, Termination,
};
use crate::query::SearchTerm;
use crate::sink::ResultSink;

/// Delay growth between retries of one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// The same delay before every retry.
    #[default]
    Fixed,
    /// Doubling delay, never longer than `max_delay`.
    Exponential { max_delay: Duration },
}

/// Per-term retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a term gets `max_retries + 1` attempts.
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                self.delay.saturating_mul(factor).min(max_delay)
            }
        }
    }

    /// Longest total time one term can spend waiting between its attempts.
    #[must_use]
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_retries).map(|retry| self.delay_for(retry)).sum()
    }
}

/// Pacing and retry settings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    /// Wait between consecutive terms.
    pub pacing_interval: Duration,
    pub retry: RetryPolicy,
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ConnectivityCheck,
    Processing,
    Completed,
    Interrupted,
    FatalError,
}

/// The terminal outcome of one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOutcomeKind {
    Success,
    NoResult,
    Failed,
    /// Failed, and the run stops here.
    Fatal,
}

/// Sent to the progress hook after each term reaches a terminal outcome.
#[derive(Debug)]
pub struct ProgressEvent<'e> {
    /// 1-based position of the term.
    pub index: usize,
    pub total: usize,
    pub term: &'e SearchTerm,
    pub outcome: TermOutcomeKind,
    /// Set when `outcome` is `Success`.
    pub result: Option<&'e SearchResult>,
    /// Set for every other outcome.
    pub failure: Option<&'e FailureReason>,
    pub stats: &'e RunStatistics,
}

enum Attempt {
    Hit(SearchHit, DateTime<Utc>),
    NoResult,
    Failed(FailureReason),
    Fatal(SearchError),
    Cancelled,
}

type ProgressHook<'a> = Box<dyn FnMut(&ProgressEvent<'_>) + 'a>;

/// Runs batches of terms against a search client.
///
/// One orchestrator runs one batch at a time; statistics and results are local
/// to each [`Orchestrator::run`] call.
pub struct Orchestrator<'a> {
    client: &'a dyn SearchClient,
    sink: &'a dyn ResultSink,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    progress: Option<ProgressHook<'a>>,
    state: RunState,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator using the system clock and a fresh cancellation token.
    #[must_use]
    pub fn new(client: &'a dyn SearchClient, sink: &'a dyn ResultSink) -> Self {
        Self {
            client,
            sink,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
            progress: None,
            state: RunState::Idle,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Observe `token` instead of the orchestrator's own token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Install a hook called synchronously after each term completes.
    #[must_use]
    pub fn on_progress<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&ProgressEvent<'_>) + 'a,
    {
        self.progress = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run `terms` in order and hand the results to the sink.
    ///
    /// Per-term failures never abort the run; only a failed connectivity check
    /// and fatal call errors do. The returned outcome always carries every
    /// result collected, even if saving them failed.
    pub fn run(&mut self, terms: &[SearchTerm], options: &RunOptions) -> RunOutcome {
        let total = terms.len();
        let mut stats = RunStatistics::new(total, self.clock.now());
        let mut results: Vec<SearchResult> = Vec::new();
        let mut failed: Vec<FailedTerm> = Vec::new();
        let mut abandoned = None;

        info!(
            terms = total,
            pacing = ?options.pacing_interval,
            max_retries = options.retry.max_retries,
            "Starting batch run"
        );

        self.transition(RunState::ConnectivityCheck);
        if let Err(e) = self.client.validate_connectivity() {
            error!(error = %e, "Connectivity check failed, no terms attempted");
            let termination = Termination::Fatal(preflight_error(e));
            return self.finish(results, failed, abandoned, stats, termination);
        }

        self.transition(RunState::Processing);
        let mut termination = Termination::Completed;

        for (position, term) in terms.iter().enumerate() {
            let index = position + 1;

            if self.cancel.is_cancelled() {
                info!(processed = stats.processed(), total, "Run cancelled");
                termination = Termination::Interrupted;
                break;
            }

            debug!(index, total, term = %term, "Searching");

            let (outcome, fatal) = match self.attempt(term, &options.retry) {
                Attempt::Hit(hit, retrieved_at) => {
                    results.push(SearchResult::new(
                        term.clone(),
                        hit.title,
                        hit.url,
                        hit.snippet,
                        retrieved_at,
                    ));
                    stats.succeeded += 1;
                    (TermOutcomeKind::Success, None)
                }
                Attempt::NoResult => {
                    warn!(index, term = %term, "No result");
                    record_failure(&mut stats, &mut failed, term, FailureReason::NoResult);
                    (TermOutcomeKind::NoResult, None)
                }
                Attempt::Failed(reason) => {
                    warn!(index, term = %term, ?reason, "Term failed");
                    record_failure(&mut stats, &mut failed, term, reason);
                    (TermOutcomeKind::Failed, None)
                }
                Attempt::Fatal(e) => {
                    error!(index, term = %term, error = %e, "Fatal error, stopping run");
                    let reason = FailureReason::Fatal {
                        detail: e.to_string(),
                    };
                    record_failure(&mut stats, &mut failed, term, reason);
                    (TermOutcomeKind::Fatal, Some(fatal_run_error(e)))
                }
                Attempt::Cancelled => {
                    info!(index, term = %term, "Run cancelled during retries");
                    abandoned = Some(term.clone());
                    termination = Termination::Interrupted;
                    break;
                }
            };

            self.notify(&ProgressEvent {
                index,
                total,
                term,
                outcome,
                result: if outcome == TermOutcomeKind::Success {
                    results.last()
                } else {
                    None
                },
                failure: if outcome == TermOutcomeKind::Success {
                    None
                } else {
                    failed.last().map(|f| &f.reason)
                },
                stats: &stats,
            });

            if let Some(e) = fatal {
                termination = Termination::Fatal(e);
                break;
            }

            if index < total && !self.clock.sleep(options.pacing_interval, &self.cancel) {
                debug!("Pacing wait cut short by cancellation");
            }
        }

        self.finish(results, failed, abandoned, stats, termination)
    }

    /// Search one term, retrying transient failures.
    fn attempt(&self, term: &SearchTerm, policy: &RetryPolicy) -> Attempt {
        let max_attempts = policy.max_retries + 1;
        let mut attempt = 1;

        loop {
            let error = match self.client.search_one(term) {
                Ok(Some(hit)) => return Attempt::Hit(hit, self.clock.now()),
                Ok(None) => return Attempt::NoResult,
                Err(e) => e,
            };

            match error.class() {
                FailureClass::Fatal => return Attempt::Fatal(error),
                FailureClass::NonRetryable => {
                    return Attempt::Failed(FailureReason::Rejected {
                        detail: error.to_string(),
                    });
                }
                FailureClass::Retryable if attempt >= max_attempts => {
                    return Attempt::Failed(FailureReason::RetriesExhausted {
                        attempts: attempt,
                        last_error: error.to_string(),
                    });
                }
                FailureClass::Retryable => {
                    let wait = policy.delay_for(attempt);
                    warn!(
                        term = %term,
                        attempt,
                        max_attempts,
                        wait = ?wait,
                        error = %error,
                        "Retryable failure"
                    );

                    if self.cancel.is_cancelled() || !self.clock.sleep(wait, &self.cancel) {
                        return Attempt::Cancelled;
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn notify(&mut self, event: &ProgressEvent<'_>) {
        if let Some(hook) = self.progress.as_mut() {
            hook(event);
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state change");
        self.state = next;
    }

    fn finish(
        &mut self,
        results: Vec<SearchResult>,
        failed: Vec<FailedTerm>,
        abandoned: Option<SearchTerm>,
        mut stats: RunStatistics,
        termination: Termination,
    ) -> RunOutcome {
        stats.ended_at = Some(self.clock.now());
        stats.interrupted = termination == Termination::Interrupted;

        let (state, kind) = match &termination {
            Termination::Completed => (RunState::Completed, SaveKind::Normal),
            Termination::Interrupted => (RunState::Interrupted, SaveKind::Emergency),
            Termination::Fatal(_) => (RunState::FatalError, SaveKind::Emergency),
        };
        self.transition(state);

        info!(
            total = stats.total_requested,
            succeeded = stats.succeeded,
            failed = stats.failed,
            unattempted = stats.unattempted(),
            interrupted = stats.interrupted,
            "Batch run finished"
        );

        let save = self.save(&results, kind);

        RunOutcome {
            results,
            failed,
            abandoned,
            statistics: stats,
            termination,
            save,
        }
    }

    fn save(&self, results: &[SearchResult], kind: SaveKind) -> SaveStatus {
        if results.is_empty() {
            info!("No results to save");
            return SaveStatus::Skipped;
        }

        let name = match kind {
            SaveKind::Normal => None,
            SaveKind::Emergency => Some(emergency_name(self.clock.now())),
        };

        match self.sink.save(results, name.as_deref()) {
            Ok(path) => SaveStatus::Saved { kind, path },
            Err(error) => {
                error!(error = %error, count = results.len(), ?kind, "Saving results failed");
                SaveStatus::Failed { kind, error }
            }
        }
    }
}

fn record_failure(
    stats: &mut RunStatistics,
    failed: &mut Vec<FailedTerm>,
    term: &SearchTerm,
    reason: FailureReason,
) {
    stats.record_failure(&reason);
    failed.push(FailedTerm {
        term: term.clone(),
        reason,
    });
}

fn fatal_run_error(error: SearchError) -> FatalRunError {
    match error {
        SearchError::Authentication(message) => FatalRunError::Authentication(message),
        SearchError::QuotaExhausted(message) => FatalRunError::QuotaExhausted(message),
        other => FatalRunError::Connectivity(other.to_string()),
    }
}

/// Credential and quota errors keep their kind; anything else is a connectivity failure.
fn preflight_error(error: SearchError) -> FatalRunError {
    match error.class() {
        FailureClass::Fatal => fatal_run_error(error),
        _ => FatalRunError::Connectivity(error.to_string()),
    }
}

/// Timestamp-qualified file stem for emergency saves.
#[must_use]
pub fn emergency_name(at: DateTime<Utc>) -> String {
    format!("emergency_save_{}", at.format("%Y%m%d_%H%M%S_%3f"))
}
