use std::process::ExitCode;

use clap::Parser;
use querybatch::cancel::CancellationToken;
use querybatch::cli::{Cli, Commands};
use querybatch::commands::{self, SearchReport};
use querybatch::config::{Config, Overrides};
use querybatch::logging::{self, Verbosity};
use querybatch::model::{SaveKind, SaveStatus, Termination};

/// Exit status after an interrupted run.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::Search(args)) => {
            let config = init(&args.overrides(), verbosity)?;
            let batch = commands::load_terms(&config, &args.source())?;
            println!("Searching {} term(s)", batch.terms.len());

            let cancel = CancellationToken::new();
            commands::install_interrupt_handler(cancel.clone())?;

            let report = commands::search(&config, batch, cancel)?;
            print_summary(&report);
            Ok(exit_code(&report))
        }
        Some(Commands::Check { timeout }) => {
            let overrides = Overrides {
                timeout,
                ..Overrides::default()
            };
            let config = init(&overrides, verbosity)?;
            commands::check_connection(&config)?;
            println!("API connection OK");
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::InitConfig { path, force }) => {
            let path = commands::init_config(path, force)?;
            println!("Wrote sample config: {}", path.display());
            println!("Fill in api.key and api.engine_id before searching.");
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::SampleTerms { path, force }) => {
            commands::sample_terms(&path, force)?;
            println!("Wrote sample terms file: {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            Cli::parse_from(["querybatch", "--help"]);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init(overrides: &Overrides, verbosity: Verbosity) -> anyhow::Result<Config> {
    let config = commands::load_config(overrides)?;
    logging::init(&config.logging, verbosity)?;
    Ok(config)
}

fn exit_code(report: &SearchReport) -> ExitCode {
    let outcome = &report.outcome;
    match (&outcome.termination, &outcome.save) {
        (Termination::Interrupted, _) => ExitCode::from(EXIT_INTERRUPTED),
        (Termination::Completed, SaveStatus::Saved { .. }) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn print_summary(report: &SearchReport) {
    let outcome = &report.outcome;
    let stats = &outcome.statistics;

    println!();
    println!("Run summary");
    println!("  terms:        {}", stats.total_requested);
    println!("  succeeded:    {}", stats.succeeded);
    println!(
        "  failed:       {} (no result {}, retries exhausted {}, rejected {}, fatal {})",
        stats.failed, stats.no_result, stats.exhausted, stats.rejected, stats.fatal
    );
    println!("  unattempted:  {}", stats.unattempted());
    if !report.dropped.is_empty() {
        println!("  dropped:      {} invalid input line(s)", report.dropped.len());
    }
    println!("  success rate: {:.1}%", stats.success_rate());
    if let Some(elapsed) = stats.elapsed() {
        #[allow(clippy::cast_precision_loss)]
        let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        println!("  elapsed:      {seconds:.1}s");
    }

    match &outcome.termination {
        Termination::Completed => {}
        Termination::Interrupted => println!("  Run was interrupted before all terms finished."),
        Termination::Fatal(e) => println!("  Run aborted: {e}"),
    }

    match &outcome.save {
        SaveStatus::Saved { kind, path } => {
            let label = match kind {
                SaveKind::Normal => "results",
                SaveKind::Emergency => "partial results",
            };
            println!("  {label}: {}", path.display());
        }
        SaveStatus::Failed { error, .. } => {
            eprintln!(
                "Failed to save {} result(s): {error}",
                outcome.results.len()
            );
        }
        SaveStatus::Skipped => println!("  No results to save."),
    }

    if let Some(summary) = &report.summary_path {
        println!("  summary: {}", summary.display());
    }
}
