//! Tracing subscriber setup for the binary.

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Console verbosity requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Normal,
    Verbose,
    Quiet,
}

impl Verbosity {
    #[must_use]
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Self::Verbose,
            (_, true) => Self::Quiet,
            _ => Self::Normal,
        }
    }
}

/// Filter directive used when `RUST_LOG` is unset.
fn default_directive(config: &LoggingConfig, verbosity: Verbosity) -> &str {
    match verbosity {
        Verbosity::Verbose => "debug",
        Verbosity::Quiet => "error",
        Verbosity::Normal => config.level.as_str(),
    }
}

/// Install the global subscriber: stderr always, plus the configured log file.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log file cannot be opened, or a
/// subscriber is already installed.
pub fn init(config: &LoggingConfig, verbosity: Verbosity) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = default_directive(config, verbosity);
            EnvFilter::try_new(directive)
                .with_context(|| format!("Invalid log level '{directive}'"))?
        }
    };

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}
