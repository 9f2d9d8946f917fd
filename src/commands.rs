//! Command implementations behind the CLI.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::client::SearchClient;
use crate::client::google::GoogleSearchClient;
use crate::config::{Config, Overrides, sample_config};
use crate::model::{RunOutcome, SaveStatus};
use crate::orchestrator::{Orchestrator, ProgressEvent, RunOptions, TermOutcomeKind};
use crate::query::{self, DroppedLine, QueryBatch, QuerySource};
use crate::sink::csv_file::CsvResultSink;

/// Longest title excerpt shown on a progress line.
const TITLE_PREVIEW_CHARS: usize = 50;

/// Everything a finished `search` produced.
#[derive(Debug)]
pub struct SearchReport {
    pub outcome: RunOutcome,
    /// Lines dropped while loading terms.
    pub dropped: Vec<DroppedLine>,
    /// The JSON summary written next to the results, if any.
    pub summary_path: Option<PathBuf>,
}

/// Load, override and validate the configuration.
///
/// # Errors
///
/// Returns an error if the config file or environment is malformed, or a value
/// is out of range.
pub fn load_config(overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

/// Load the terms for a run.
///
/// # Errors
///
/// Returns an error if the source yields no valid term.
pub fn load_terms(config: &Config, source: &QuerySource) -> anyhow::Result<QueryBatch> {
    let batch = query::load(source, config.input.encoding_confidence)?;
    if !batch.dropped.is_empty() {
        warn!(dropped = batch.dropped.len(), "Some input lines were dropped");
    }
    Ok(batch)
}

fn google_client(config: &Config) -> anyhow::Result<GoogleSearchClient> {
    let (key, engine_id) = config.api.credentials()?;
    GoogleSearchClient::new(&config.api.endpoint, key, engine_id, config.timeout())
        .context("Failed to build search client")
}

/// Check connectivity and credentials against the configured API.
///
/// # Errors
///
/// Returns an error if credentials are missing or the API cannot be used.
pub fn check_connection(config: &Config) -> anyhow::Result<()> {
    let client = google_client(config)?;
    client
        .validate_connectivity()
        .context("API connection check failed")?;
    info!("API connection check passed");
    Ok(())
}

/// Run `batch` against the configured API and save the results.
///
/// # Errors
///
/// Returns an error if credentials are missing or the client cannot be built.
/// Failures during the run itself are reported in the returned outcome.
pub fn search(
    config: &Config,
    batch: QueryBatch,
    cancel: CancellationToken,
) -> anyhow::Result<SearchReport> {
    let client = google_client(config)?;
    let sink = CsvResultSink::new(
        config.output.directory.clone(),
        config.output.filename_prefix.clone(),
    );
    Ok(execute(&client, &sink, &config.run_options(), batch, cancel))
}

/// Run `batch` with the given client and sink, printing progress to stdout.
///
/// Writes a JSON summary next to the results whenever they were saved.
pub fn execute(
    client: &dyn SearchClient,
    sink: &CsvResultSink,
    options: &RunOptions,
    batch: QueryBatch,
    cancel: CancellationToken,
) -> SearchReport {
    let QueryBatch { terms, dropped } = batch;

    let outcome = Orchestrator::new(client, sink)
        .with_cancellation(cancel)
        .on_progress(print_progress)
        .run(&terms, options);

    let summary_path = match &outcome.save {
        SaveStatus::Saved { path, .. } => match sink.write_summary(&outcome, &dropped, path) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Failed to write run summary");
                None
            }
        },
        _ => None,
    };

    SearchReport {
        outcome,
        dropped,
        summary_path,
    }
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(TITLE_PREVIEW_CHARS).collect();
    if text.chars().count() > TITLE_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

fn print_progress(event: &ProgressEvent<'_>) {
    let width = event.total.to_string().len();
    let position = format!("[{:>width$}/{}]", event.index, event.total);

    let detail = match event.outcome {
        TermOutcomeKind::Success => {
            let title = event.result.map_or("", |r| r.title());
            format!("ok    '{}' -> {}", event.term, preview(title))
        }
        TermOutcomeKind::NoResult => format!("none  '{}'", event.term),
        TermOutcomeKind::Failed | TermOutcomeKind::Fatal => {
            let reason = event.failure.map(ToString::to_string).unwrap_or_default();
            format!("FAIL  '{}': {reason}", event.term)
        }
    };

    println!(
        "{position} {detail}  ({}/{} ok, {:.1}% done)",
        event.stats.succeeded,
        event.stats.processed(),
        event.stats.percent_complete()
    );
}

/// Operator stop requests: Ctrl+C everywhere, plus SIGTERM on Unix.
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl ShutdownSignals {
    /// Register the listeners. Must be called inside a tokio runtime.
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let terminate = match signal(SignalKind::terminate()) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C will stop a run");
                    None
                }
            };
            Self { terminate }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the next stop request. Returns false if no listener is left.
    async fn recv(&mut self) -> bool {
        #[cfg(unix)]
        {
            if let Some(terminate) = self.terminate.as_mut() {
                return tokio::select! {
                    result = tokio::signal::ctrl_c() => result.is_ok(),
                    received = terminate.recv() => received.is_some(),
                };
            }
        }

        tokio::signal::ctrl_c().await.is_ok()
    }
}

/// Listen for Ctrl+C (and SIGTERM on Unix) on a background thread and cancel
/// `token` when one arrives.
///
/// A second stop request exits the process immediately with status 130.
///
/// # Errors
///
/// Returns an error if the signal runtime or listener thread cannot be started.
pub fn install_interrupt_handler(token: CancellationToken) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;

    let mut signals = runtime.block_on(async { ShutdownSignals::new() });

    std::thread::Builder::new()
        .name("interrupt-listener".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if !signals.recv().await {
                    return;
                }
                warn!("Stop requested, finishing the current call");
                eprintln!("\nInterrupted: saving partial results (Ctrl+C again to quit now)");
                token.cancel();

                if signals.recv().await {
                    std::process::exit(130);
                }
            });
        })
        .context("Failed to spawn interrupt listener")?;

    Ok(())
}

/// Write a sample config file and return its path.
///
/// # Errors
///
/// Returns an error if no path can be determined, the file exists and `force`
/// is false, or the write fails.
pub fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<PathBuf> {
    let path = match path {
        Some(path) => path,
        None => Config::default_config_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory; pass --path"))?,
    };

    write_new_file(&path, &sample_config(), force)?;
    Ok(path)
}

/// Write a sample terms file.
///
/// # Errors
///
/// Returns an error if the file exists and `force` is false, or the write fails.
pub fn sample_terms(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("File already exists: {} (use --force to overwrite)", path.display());
    }
    query::write_sample_terms(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_new_file(path: &Path, contents: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("File already exists: {} (use --force to overwrite)", path.display());
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}
