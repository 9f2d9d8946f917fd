//! Integration tests for the querybatch library.
//!
//! The orchestrator is driven with a scripted search client, a recording sink and
//! a virtual clock, so no test touches the network or really sleeps.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use querybatch::cancel::CancellationToken;
use querybatch::client::{SearchClient, SearchError, SearchHit};
use querybatch::clock::Clock;
use querybatch::model::{
    FailureReason, FatalRunError, RunOutcome, SaveKind, SaveStatus, SearchResult, Termination,
};
use querybatch::orchestrator::{
    Backoff, Orchestrator, RetryPolicy, RunOptions, RunState, TermOutcomeKind,
};
use querybatch::query::SearchTerm;
use querybatch::sink::{ResultSink, SinkError};

// =============================================================================
// Test Doubles
// =============================================================================

type Response = Result<Option<SearchHit>, SearchError>;
type Responder = Box<dyn Fn(&str, u32) -> Response + Send + Sync>;

/// Search client whose answers are computed from the term and the attempt number.
struct ScriptedClient {
    connectivity: Result<(), SearchError>,
    respond: Responder,
    attempts: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(respond: impl Fn(&str, u32) -> Response + Send + Sync + 'static) -> Self {
        Self {
            connectivity: Ok(()),
            respond: Box::new(respond),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn always_hit() -> Self {
        Self::new(|term, _| Ok(Some(hit(term))))
    }

    fn offline() -> Self {
        Self::failing_preflight(SearchError::Transport("connection refused".to_string()))
    }

    fn failing_preflight(error: SearchError) -> Self {
        let mut client = Self::always_hit();
        client.connectivity = Err(error);
        client
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SearchClient for ScriptedClient {
    fn validate_connectivity(&self) -> Result<(), SearchError> {
        self.connectivity.clone()
    }

    fn search_one(&self, term: &SearchTerm) -> Result<Option<SearchHit>, SearchError> {
        self.calls.lock().unwrap().push(term.to_string());
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(term.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        (self.respond)(term.as_str(), attempt)
    }
}

/// Sink that records what it was asked to save.
#[derive(Default)]
struct RecordingSink {
    saves: Mutex<Vec<(Vec<String>, Option<String>)>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn saves(&self) -> Vec<(Vec<String>, Option<String>)> {
        self.saves.lock().unwrap().clone()
    }
}

impl ResultSink for RecordingSink {
    fn save(
        &self,
        results: &[SearchResult],
        suggested_name: Option<&str>,
    ) -> Result<PathBuf, SinkError> {
        let keywords = results.iter().map(|r| r.keyword().to_string()).collect();
        self.saves
            .lock()
            .unwrap()
            .push((keywords, suggested_name.map(str::to_string)));

        if self.fail {
            return Err(SinkError::WriteError {
                path: PathBuf::from("results.csv"),
                message: "disk full".to_string(),
            });
        }
        Ok(PathBuf::from(suggested_name.unwrap_or("results.csv")))
    }
}

/// Virtual clock: sleeping advances time instantly.
struct ManualClock {
    start: DateTime<Utc>,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = *self.elapsed.lock().unwrap();
        self.start + chrono::Duration::from_std(elapsed).unwrap()
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.sleeps.lock().unwrap().push(duration);
        *self.elapsed.lock().unwrap() += duration;
        true
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn hit(term: &str) -> SearchHit {
    SearchHit {
        title: format!("{term} title"),
        url: format!("https://example.com/{term}"),
        snippet: String::new(),
    }
}

fn terms(values: &[&str]) -> Vec<SearchTerm> {
    values.iter().map(|v| SearchTerm::parse(v).unwrap()).collect()
}

fn options(pacing_secs: u64, max_retries: u32) -> RunOptions {
    RunOptions {
        pacing_interval: Duration::from_secs(pacing_secs),
        retry: RetryPolicy {
            max_retries,
            delay: Duration::from_millis(500),
            backoff: Backoff::Fixed,
        },
    }
}

fn keywords(outcome: &RunOutcome) -> Vec<String> {
    outcome
        .results
        .iter()
        .map(|r| r.keyword().to_string())
        .collect()
}

fn failed_terms(outcome: &RunOutcome) -> Vec<String> {
    outcome.failed.iter().map(|f| f.term.to_string()).collect()
}

fn run(
    client: &ScriptedClient,
    sink: &RecordingSink,
    input: &[&str],
    opts: &RunOptions,
) -> (RunOutcome, Arc<ManualClock>) {
    let clock = ManualClock::new();
    let outcome = Orchestrator::new(client, sink)
        .with_clock(clock.clone())
        .run(&terms(input), opts);
    (outcome, clock)
}

// =============================================================================
// Orchestrator: normal completion
// =============================================================================

mod completion_tests {
    use super::*;

    #[test]
    fn all_successes_keep_input_order() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha", "beta", "gamma"], &options(0, 3));

        assert_eq!(keywords(&outcome), vec!["alpha", "beta", "gamma"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.statistics.succeeded, 3);
        assert_eq!(outcome.statistics.failed, 0);
        assert!(!outcome.statistics.interrupted);
        assert_eq!(client.calls(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn completed_run_uses_normal_save() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha", "beta"], &options(0, 3));

        assert_eq!(
            sink.saves(),
            vec![(vec!["alpha".to_string(), "beta".to_string()], None)]
        );
        assert!(matches!(
            outcome.save,
            SaveStatus::Saved {
                kind: SaveKind::Normal,
                ..
            }
        ));
    }

    #[test]
    fn results_carry_hit_fields_and_retrieval_time() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();

        let (outcome, clock) = run(&client, &sink, &["alpha", "beta"], &options(1, 0));

        let first = &outcome.results[0];
        assert_eq!(first.title(), "alpha title");
        assert_eq!(first.url(), "https://example.com/alpha");
        assert_eq!(first.retrieved_at(), clock.start);
        assert_eq!(
            outcome.results[1].retrieved_at(),
            clock.start + chrono::Duration::seconds(1)
        );
    }

    #[test]
    fn statistics_timestamps_are_set() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();

        let (outcome, clock) = run(&client, &sink, &["alpha"], &options(0, 0));

        assert_eq!(outcome.statistics.started_at, clock.start);
        assert!(outcome.statistics.ended_at.is_some());
    }

    #[test]
    fn state_ends_completed() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();
        let mut orchestrator = Orchestrator::new(&client, &sink).with_clock(ManualClock::new());
        assert_eq!(orchestrator.state(), RunState::Idle);

        orchestrator.run(&terms(&["alpha"]), &options(0, 0));
        assert_eq!(orchestrator.state(), RunState::Completed);
    }

    #[test]
    fn no_result_counts_as_failure_with_its_own_reason() {
        let client = ScriptedClient::new(|term, _| {
            if term == "nothing" {
                Ok(None)
            } else {
                Ok(Some(hit(term)))
            }
        });
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha", "nothing", "beta"], &options(0, 3));

        assert_eq!(keywords(&outcome), vec!["alpha", "beta"]);
        assert_eq!(failed_terms(&outcome), vec!["nothing"]);
        assert_eq!(outcome.failed[0].reason, FailureReason::NoResult);
        assert_eq!(outcome.statistics.no_result, 1);
        assert_eq!(outcome.statistics.failed, 1);
        assert_eq!(client.calls().len(), 3);
    }

    #[test]
    fn nothing_to_save_is_skipped() {
        let client = ScriptedClient::new(|_, _| Ok(None));
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha"], &options(0, 0));

        assert!(matches!(outcome.save, SaveStatus::Skipped));
        assert!(sink.saves().is_empty());
    }
}

// =============================================================================
// Orchestrator: retries
// =============================================================================

mod retry_tests {
    use super::*;

    #[test]
    fn transient_failures_are_masked_by_retries() {
        // Each term fails twice before succeeding; the budget allows three retries.
        let client = ScriptedClient::new(|term, attempt| {
            if attempt <= 2 {
                Err(SearchError::Timeout("slow".to_string()))
            } else {
                Ok(Some(hit(term)))
            }
        });
        let sink = RecordingSink::default();

        let (outcome, clock) = run(&client, &sink, &["alpha", "beta"], &options(0, 3));

        assert_eq!(keywords(&outcome), vec!["alpha", "beta"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(client.calls().len(), 6);

        let retry_waits = clock
            .sleeps()
            .iter()
            .filter(|d| **d == Duration::from_millis(500))
            .count();
        assert_eq!(retry_waits, 4);
    }

    #[test]
    fn exhausted_term_fails_once_and_run_continues() {
        let client = ScriptedClient::new(|term, _| {
            if term == "flaky" {
                Err(SearchError::Server {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            } else {
                Ok(Some(hit(term)))
            }
        });
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha", "flaky", "beta"], &options(0, 2));

        assert_eq!(keywords(&outcome), vec!["alpha", "beta"]);
        assert_eq!(failed_terms(&outcome), vec!["flaky"]);
        assert!(matches!(
            &outcome.failed[0].reason,
            FailureReason::RetriesExhausted { attempts: 3, last_error } if last_error.contains("503")
        ));
        assert_eq!(outcome.statistics.exhausted, 1);
        assert_eq!(outcome.termination, Termination::Completed);

        let flaky_calls = client.calls().iter().filter(|c| *c == "flaky").count();
        assert_eq!(flaky_calls, 3);
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let client = ScriptedClient::new(|_, _| Err(SearchError::RateLimited("429".to_string())));
        let sink = RecordingSink::default();

        let (outcome, clock) = run(&client, &sink, &["alpha"], &options(0, 0));

        assert_eq!(client.calls().len(), 1);
        assert!(matches!(
            outcome.failed[0].reason,
            FailureReason::RetriesExhausted { attempts: 1, .. }
        ));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn rejected_query_does_not_consume_retries() {
        let client = ScriptedClient::new(|term, _| {
            if term == "bad" {
                Err(SearchError::Rejected {
                    status: 400,
                    message: "Invalid Value".to_string(),
                })
            } else {
                Ok(Some(hit(term)))
            }
        });
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["bad", "alpha"], &options(0, 5));

        assert_eq!(client.calls(), vec!["bad", "alpha"]);
        assert!(matches!(outcome.failed[0].reason, FailureReason::Rejected { .. }));
        assert_eq!(outcome.statistics.rejected, 1);
        assert_eq!(keywords(&outcome), vec!["alpha"]);
    }

    #[test]
    fn exponential_backoff_waits_grow() {
        let client = ScriptedClient::new(|_, _| Err(SearchError::Timeout("slow".to_string())));
        let sink = RecordingSink::default();
        let opts = RunOptions {
            pacing_interval: Duration::ZERO,
            retry: RetryPolicy {
                max_retries: 3,
                delay: Duration::from_secs(1),
                backoff: Backoff::Exponential {
                    max_delay: Duration::from_secs(3),
                },
            },
        };

        let (_, clock) = run(&client, &sink, &["alpha"], &opts);

        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
    }
}

// =============================================================================
// Orchestrator: fatal errors
// =============================================================================

mod fatal_tests {
    use super::*;

    #[test]
    fn failed_connectivity_check_attempts_nothing() {
        let client = ScriptedClient::offline();
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha", "beta"], &options(1, 3));

        assert!(client.calls().is_empty());
        assert!(outcome.results.is_empty());
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.statistics.total_requested, 2);
        assert_eq!(outcome.statistics.unattempted(), 2);
        assert!(matches!(
            outcome.fatal_error(),
            Some(FatalRunError::Connectivity(message)) if message.contains("connection refused")
        ));
        assert!(matches!(outcome.save, SaveStatus::Skipped));
    }

    #[test]
    fn rejected_key_at_connectivity_check_is_an_authentication_error() {
        let client = ScriptedClient::failing_preflight(SearchError::Authentication(
            "API key not valid".to_string(),
        ));
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha", "beta"], &options(1, 3));

        assert!(client.calls().is_empty());
        assert_eq!(
            outcome.fatal_error(),
            Some(&FatalRunError::Authentication("API key not valid".to_string()))
        );
        assert_eq!(outcome.statistics.unattempted(), 2);
    }

    #[test]
    fn exhausted_quota_at_connectivity_check_is_reported_as_quota() {
        let client =
            ScriptedClient::failing_preflight(SearchError::QuotaExhausted("daily".to_string()));
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha"], &options(0, 0));

        assert!(matches!(
            outcome.fatal_error(),
            Some(FatalRunError::QuotaExhausted(_))
        ));
    }

    #[test]
    fn authentication_failure_stops_run_and_saves_emergency_copy() {
        let client = ScriptedClient::new(|term, _| {
            if term == "beta" {
                Err(SearchError::Authentication("API key not valid".to_string()))
            } else {
                Ok(Some(hit(term)))
            }
        });
        let sink = RecordingSink::default();

        let (outcome, clock) = run(&client, &sink, &["alpha", "beta", "gamma"], &options(1, 3));

        assert_eq!(client.calls(), vec!["alpha", "beta"]);
        assert_eq!(keywords(&outcome), vec!["alpha"]);
        assert_eq!(failed_terms(&outcome), vec!["beta"]);
        assert!(matches!(outcome.failed[0].reason, FailureReason::Fatal { .. }));
        assert_eq!(outcome.statistics.fatal, 1);
        assert_eq!(outcome.statistics.unattempted(), 1);
        assert!(matches!(
            outcome.termination,
            Termination::Fatal(FatalRunError::Authentication(_))
        ));

        // One pacing wait after alpha; none after the fatal term.
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);

        let saves = sink.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0, vec!["alpha"]);
        assert!(
            saves[0]
                .1
                .as_deref()
                .is_some_and(|name| name.starts_with("emergency_save_"))
        );
    }

    #[test]
    fn exhausted_quota_is_fatal() {
        let client =
            ScriptedClient::new(|_, _| Err(SearchError::QuotaExhausted("daily limit".to_string())));
        let sink = RecordingSink::default();

        let (outcome, _) = run(&client, &sink, &["alpha", "beta"], &options(0, 3));

        assert_eq!(client.calls(), vec!["alpha"]);
        assert!(matches!(
            outcome.termination,
            Termination::Fatal(FatalRunError::QuotaExhausted(_))
        ));
    }

    #[test]
    fn sink_failure_keeps_results_and_is_reported() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::failing();

        let (outcome, _) = run(&client, &sink, &["alpha", "beta"], &options(0, 3));

        assert_eq!(keywords(&outcome), vec!["alpha", "beta"]);
        assert!(matches!(
            outcome.save,
            SaveStatus::Failed {
                kind: SaveKind::Normal,
                ..
            }
        ));
        assert_eq!(sink.saves().len(), 1);
        assert_eq!(client.calls().len(), 2);
    }
}

// =============================================================================
// Orchestrator: cancellation
// =============================================================================

mod cancellation_tests {
    use super::*;

    #[test]
    fn cancel_between_terms_saves_partial_results() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();
        let token = CancellationToken::new();
        let hook_token = token.clone();

        let outcome = Orchestrator::new(&client, &sink)
            .with_clock(ManualClock::new())
            .with_cancellation(token)
            .on_progress(move |event| {
                if event.index == 2 {
                    hook_token.cancel();
                }
            })
            .run(&terms(&["alpha", "beta", "gamma", "delta"]), &options(1, 3));

        assert_eq!(keywords(&outcome), vec!["alpha", "beta"]);
        assert!(outcome.statistics.interrupted);
        assert!(outcome.is_interrupted());
        assert_eq!(outcome.statistics.processed(), 2);
        assert_eq!(outcome.statistics.unattempted(), 2);
        assert_eq!(client.calls(), vec!["alpha", "beta"]);

        let saves = sink.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0, vec!["alpha", "beta"]);
        assert!(
            saves[0]
                .1
                .as_deref()
                .is_some_and(|name| name.starts_with("emergency_save_"))
        );
        assert!(matches!(
            outcome.save,
            SaveStatus::Saved {
                kind: SaveKind::Emergency,
                ..
            }
        ));
    }

    #[test]
    fn cancel_before_start_attempts_nothing() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();
        let token = CancellationToken::new();
        token.cancel();

        let mut orchestrator = Orchestrator::new(&client, &sink)
            .with_clock(ManualClock::new())
            .with_cancellation(token);
        let outcome = orchestrator.run(&terms(&["alpha", "beta"]), &options(1, 3));

        assert!(client.calls().is_empty());
        assert!(outcome.statistics.interrupted);
        assert_eq!(orchestrator.state(), RunState::Interrupted);
        assert!(matches!(outcome.save, SaveStatus::Skipped));
    }

    #[test]
    fn cancel_during_retries_abandons_the_term() {
        let token = CancellationToken::new();
        let client_token = token.clone();
        let client = ScriptedClient::new(move |term, attempt| {
            if term == "beta" {
                if attempt == 2 {
                    client_token.cancel();
                }
                Err(SearchError::Timeout("slow".to_string()))
            } else {
                Ok(Some(hit(term)))
            }
        });
        let sink = RecordingSink::default();

        let outcome = Orchestrator::new(&client, &sink)
            .with_clock(ManualClock::new())
            .with_cancellation(token)
            .run(&terms(&["alpha", "beta", "gamma"]), &options(0, 5));

        assert_eq!(client.calls(), vec!["alpha", "beta", "beta"]);
        assert_eq!(keywords(&outcome), vec!["alpha"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.abandoned.as_ref().map(SearchTerm::as_str), Some("beta"));
        assert_eq!(outcome.statistics.processed(), 1);
        assert!(outcome.statistics.interrupted);
        assert_eq!(sink.saves()[0].0, vec!["alpha"]);
    }

    #[test]
    fn orchestrator_token_can_be_shared() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();
        let orchestrator = Orchestrator::new(&client, &sink);

        let remote = orchestrator.cancellation().clone();
        remote.cancel();
        assert!(orchestrator.cancellation().is_cancelled());
    }
}

// =============================================================================
// Orchestrator: pacing and progress
// =============================================================================

mod pacing_tests {
    use super::*;

    #[test]
    fn pacing_waits_between_terms_only() {
        let client = ScriptedClient::always_hit();
        let sink = RecordingSink::default();

        let (outcome, clock) = run(&client, &sink, &["alpha", "beta", "gamma"], &options(1, 3));

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(1)]
        );
        let elapsed = outcome.statistics.elapsed().unwrap();
        assert!(elapsed >= chrono::Duration::seconds(2));
        assert!(elapsed < chrono::Duration::seconds(3));
    }

    #[test]
    fn pacing_applies_after_failures_too() {
        let client = ScriptedClient::new(|_, _| Ok(None));
        let sink = RecordingSink::default();

        let (_, clock) = run(&client, &sink, &["alpha", "beta"], &options(2, 0));

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn progress_hook_sees_every_term_in_order() {
        let client = ScriptedClient::new(|term, _| match term {
            "nothing" => Ok(None),
            "bad" => Err(SearchError::Rejected {
                status: 400,
                message: "nope".to_string(),
            }),
            _ => Ok(Some(hit(term))),
        });
        let sink = RecordingSink::default();
        let events = Mutex::new(Vec::new());

        Orchestrator::new(&client, &sink)
            .with_clock(ManualClock::new())
            .on_progress(|event| {
                assert!(event.stats.processed() <= event.total);
                assert_eq!(event.result.is_some(), event.outcome == TermOutcomeKind::Success);
                events.lock().unwrap().push((
                    event.index,
                    event.total,
                    event.term.to_string(),
                    event.outcome,
                    event.stats.succeeded,
                    event.stats.failed,
                ));
            })
            .run(&terms(&["alpha", "nothing", "bad"]), &options(0, 1));

        assert_eq!(
            events.into_inner().unwrap(),
            vec![
                (1, 3, "alpha".to_string(), TermOutcomeKind::Success, 1, 0),
                (2, 3, "nothing".to_string(), TermOutcomeKind::NoResult, 1, 1),
                (3, 3, "bad".to_string(), TermOutcomeKind::Failed, 1, 2),
            ]
        );
    }
}

// =============================================================================
// Query loading (use temp directories directly)
// =============================================================================

mod query_file_tests {
    use querybatch::query::{self, QueryError, QuerySource};

    use super::*;

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("Failed to write terms file");
        path
    }

    #[test]
    fn blank_comment_and_long_lines_are_filtered() {
        let dir = TempDir::new().unwrap();
        let long = "x".repeat(250);
        let text = format!("alpha\n\n# note\n// aside\n{long}\nbeta\n");
        let path = write(&dir, "terms.txt", text.as_bytes());

        let batch = query::load_file(&path, 0.7).unwrap();

        let loaded: Vec<_> = batch.terms.iter().map(SearchTerm::as_str).collect();
        assert_eq!(loaded, vec!["alpha", "beta"]);
        assert_eq!(batch.dropped.len(), 1);
        assert_eq!(batch.dropped[0].line, Some(5));
    }

    #[test]
    fn file_without_valid_terms_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "terms.txt", b"# only comments\n\n// here\n");

        let err = query::load_file(&path, 0.7).unwrap_err();
        assert!(matches!(err, QueryError::NoValidTerms(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = query::load_file(&dir.path().join("missing.txt"), 0.7).unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }

    #[test]
    fn shift_jis_file_is_decoded() {
        let dir = TempDir::new().unwrap();
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("機械学習 入門\nデータサイエンス\n");
        let path = write(&dir, "terms.txt", &bytes);

        let batch = query::load_file(&path, 0.7).unwrap();

        let loaded: Vec<_> = batch.terms.iter().map(SearchTerm::as_str).collect();
        assert_eq!(loaded, vec!["機械学習 入門", "データサイエンス"]);
    }

    #[test]
    fn single_source_validates_term() {
        let batch = query::load(&QuerySource::Single("  rust  ".to_string()), 0.7).unwrap();
        assert_eq!(batch.terms[0].as_str(), "rust");

        let err = query::load(&QuerySource::Single(String::new()), 0.7).unwrap_err();
        assert!(matches!(err, QueryError::InvalidTerm(_)));
    }
}

// =============================================================================
// End-to-end through the CSV sink
// =============================================================================

mod csv_execute_tests {
    use querybatch::commands;
    use querybatch::query::QueryBatch;
    use querybatch::sink::csv_file::CsvResultSink;

    use super::*;

    #[test]
    fn execute_writes_results_and_summary() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new(|term, _| {
            if term == "nothing" {
                Ok(None)
            } else {
                Ok(Some(hit(term)))
            }
        });
        let sink = CsvResultSink::new(dir.path().join("out"), "batch".to_string());
        let batch = QueryBatch {
            terms: terms(&["alpha", "nothing", "beta"]),
            dropped: Vec::new(),
        };

        let report = commands::execute(
            &client,
            &sink,
            &options(0, 0),
            batch,
            CancellationToken::new(),
        );

        let csv_path = report.outcome.saved_path().cloned().unwrap();
        let csv = fs::read_to_string(&csv_path).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.contains("https://example.com/beta"));

        let summary_path = report.summary_path.unwrap();
        assert!(
            summary_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with("_summary.json")
        );
        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(summary["termination"], "completed");
        assert_eq!(summary["statistics"]["succeeded"], 2);
        assert_eq!(summary["statistics"]["no_result"], 1);
        assert_eq!(summary["failed"][0]["term"], "nothing");
        assert_eq!(summary["failed"][0]["reason"]["kind"], "no_result");
    }

    #[test]
    fn interrupted_execute_writes_emergency_file() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let client_token = token.clone();
        let client = ScriptedClient::new(move |term, _| {
            if term == "beta" {
                client_token.cancel();
            }
            Ok(Some(hit(term)))
        });
        let sink = CsvResultSink::new(dir.path().to_path_buf(), "batch".to_string());
        let batch = QueryBatch {
            terms: terms(&["alpha", "beta", "gamma"]),
            dropped: Vec::new(),
        };

        let report = commands::execute(&client, &sink, &options(0, 0), batch, token);

        assert!(report.outcome.is_interrupted());
        let path = report.outcome.saved_path().unwrap();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("emergency_save_")
        );
        let csv = fs::read_to_string(path).unwrap();
        assert!(csv.contains("alpha"));
        assert!(csv.contains("beta"));
        assert!(!csv.contains("gamma"));
    }
}
