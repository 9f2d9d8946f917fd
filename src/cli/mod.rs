//! CLI interface for querybatch.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::config::Overrides;
use crate::query::QuerySource;

/// Command-line interface for querybatch.
#[derive(Parser)]
#[command(name = "querybatch")]
#[command(author, version, about = "Paced batch search against a rate-limited search API", long_about = None)]
pub struct Cli {
    /// Show debug logs.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a batch of searches and save the results as CSV.
    Search(SearchArgs),

    /// Check that the search API is reachable with the configured credentials.
    Check {
        /// Per-request timeout in seconds (1-60).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Write a sample configuration file.
    InitConfig {
        /// Where to write it (defaults to the platform config directory).
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Write an annotated sample terms file.
    SampleTerms {
        /// Where to write it.
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Arguments for the `search` command. Exactly one input mode is required.
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .args(["query", "file", "interactive"])
))]
pub struct SearchArgs {
    /// A single search term.
    pub query: Option<String>,

    /// Read terms from a file, one per line (# and // start comments).
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Type terms interactively, ending with an empty line.
    #[arg(short, long)]
    pub interactive: bool,

    /// Output directory for result files.
    #[arg(short, long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// File name prefix for result files.
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Seconds to wait between terms (0-60).
    #[arg(long)]
    pub delay: Option<f64>,

    /// Retries per term after the first attempt (0-10).
    #[arg(long)]
    pub retry: Option<u32>,

    /// Per-request timeout in seconds (1-60).
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl SearchArgs {
    /// The input mode selected on the command line.
    #[must_use]
    pub fn source(&self) -> QuerySource {
        if let Some(path) = &self.file {
            QuerySource::File(path.clone())
        } else if self.interactive {
            QuerySource::Interactive
        } else {
            QuerySource::Single(self.query.clone().unwrap_or_default())
        }
    }

    #[must_use]
    pub fn overrides(&self) -> Overrides {
        Overrides {
            output_directory: self.output_dir.clone(),
            filename_prefix: self.prefix.clone(),
            delay: self.delay,
            retry_count: self.retry,
            timeout: self.timeout,
        }
    }
}
