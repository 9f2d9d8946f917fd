//! querybatch - paced batch searches against a rate-limited search API.
//!
//! This library runs an ordered list of search terms through a search API one call
//! at a time, waiting between calls, retrying transient failures, and saving what
//! was collected even when the run is interrupted or aborted.
//!
//! # Modules
//!
//! - [`orchestrator`] - The batch run engine (pacing, retries, cancellation)
//! - [`query`] - Search term validation and input sources
//! - [`client`] - Search client trait and the Google Custom Search client
//! - [`sink`] - Result sink trait and the CSV sink
//! - [`model`] - Result and run statistics types
//! - [`cancel`] - Cancellation token
//! - [`clock`] - Time source used for pacing and timestamps
//! - [`config`] - Configuration loading
//! - [`commands`] - High-level operations used by the CLI
//! - [`cli`] - Command-line interface definitions

pub mod cancel;
pub mod cli;
pub mod client;
pub mod clock;
pub mod commands;
pub mod config;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod query;
pub mod sink;
