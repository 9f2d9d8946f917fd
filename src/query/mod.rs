//! Search term validation and query sources.
//!
//! A run is fed from exactly one [`QuerySource`]: a single literal term, a
//! newline-delimited file, or terms typed interactively. Every candidate line is
//! trimmed and validated into a [`SearchTerm`]; invalid lines are dropped with a
//! warning rather than failing the whole load.

pub mod encoding;
pub mod interactive;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Maximum length of a search term, in characters.
pub const MAX_TERM_LENGTH: usize = 200;

/// Minimum encoding detection confidence used when none is configured.
pub const DEFAULT_ENCODING_CONFIDENCE: f32 = 0.7;

/// Reasons a candidate line is not a valid search term.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermError {
    #[error("term is empty")]
    Empty,

    #[error("term too long: {0} chars (max {MAX_TERM_LENGTH})")]
    TooLong(usize),

    #[error("term contains control character U+{0:04X}")]
    ControlCharacter(u32),
}

/// Errors that can occur while loading terms from a source.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Input file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid search term: {0}")]
    InvalidTerm(#[from] TermError),

    #[error("No valid search terms found in {0}")]
    NoValidTerms(String),

    #[error("Search cancelled at confirmation prompt")]
    Declined,

    #[error("Interactive input failed: {0}")]
    Interactive(#[source] io::Error),
}

/// A validated search query string.
///
/// Non-empty, at most [`MAX_TERM_LENGTH`] characters, trimmed, and free of control
/// characters other than tab, LF and CR.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SearchTerm(String);

impl SearchTerm {
    /// Trim and validate a raw candidate.
    ///
    /// # Errors
    ///
    /// Returns `TermError` if the trimmed value is empty, too long, or contains a
    /// disallowed control character.
    pub fn parse(raw: &str) -> Result<Self, TermError> {
        let value = raw.trim();

        if value.is_empty() {
            return Err(TermError::Empty);
        }

        let length = value.chars().count();
        if length > MAX_TERM_LENGTH {
            return Err(TermError::TooLong(length));
        }

        if let Some(c) = value
            .chars()
            .find(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
        {
            return Err(TermError::ControlCharacter(u32::from(c)));
        }

        Ok(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SearchTerm {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where the terms for a run come from.
#[derive(Debug, Clone)]
pub enum QuerySource {
    /// One literal term given on the command line.
    Single(String),
    /// A newline-delimited terms file.
    File(PathBuf),
    /// Terms typed line by line on the terminal.
    Interactive,
}

/// A line that was dropped while loading terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedLine {
    /// 1-based line number within the terms file or interactive session.
    pub line: Option<usize>,
    pub reason: String,
}

/// Validated terms in input order, plus whatever was dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    pub terms: Vec<SearchTerm>,
    pub dropped: Vec<DroppedLine>,
}

impl QueryBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Returns true for lines that are skipped without a warning.
fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("//")
}

/// Validate the lines of a terms file.
///
/// Blank lines and lines starting with `#` or `//` are skipped silently. Invalid
/// lines are dropped with a warning and recorded in [`QueryBatch::dropped`].
#[must_use]
pub fn parse_lines(text: &str) -> QueryBatch {
    let mut batch = QueryBatch::default();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if is_skippable(line) {
            continue;
        }

        match SearchTerm::parse(line) {
            Ok(term) => batch.terms.push(term),
            Err(e) => {
                let preview: String = line.chars().take(50).collect();
                warn!(line = index + 1, %preview, "Dropping invalid term: {e}");
                batch.dropped.push(DroppedLine {
                    line: Some(index + 1),
                    reason: e.to_string(),
                });
            }
        }
    }

    batch
}

/// Read and validate terms from a file, detecting its text encoding.
///
/// # Errors
///
/// Returns `QueryError::NotFound` if the file doesn't exist,
/// `QueryError::Read` if it can't be read, and `QueryError::NoValidTerms` if no
/// line survives filtering.
pub fn load_file(path: &Path, min_confidence: f32) -> Result<QueryBatch, QueryError> {
    if !path.exists() {
        return Err(QueryError::NotFound(path.to_path_buf()));
    }

    let bytes = fs::read(path).map_err(|source| QueryError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let (text, encoding) = encoding::decode(&bytes, min_confidence);
    info!(path = %path.display(), encoding = encoding.name(), "Reading terms file");

    let batch = parse_lines(&text);
    if batch.is_empty() {
        return Err(QueryError::NoValidTerms(path.display().to_string()));
    }

    info!(
        terms = batch.terms.len(),
        dropped = batch.dropped.len(),
        "Loaded terms file"
    );
    Ok(batch)
}

/// Load terms from the given source.
///
/// Interactive collection reads from stdin and prompts on stdout.
///
/// # Errors
///
/// Returns `QueryError` if the source yields no valid term or cannot be read.
pub fn load(source: &QuerySource, min_confidence: f32) -> Result<QueryBatch, QueryError> {
    match source {
        QuerySource::Single(raw) => {
            let term = SearchTerm::parse(raw)?;
            info!(term = %term, "Single term input");
            Ok(QueryBatch {
                terms: vec![term],
                dropped: Vec::new(),
            })
        }
        QuerySource::File(path) => load_file(path, min_confidence),
        QuerySource::Interactive => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            interactive::collect(stdin.lock(), stdout.lock())
        }
    }
}

const SAMPLE_TERMS: &str = "\
# querybatch sample terms file
# Lines starting with # or // are comments. Blank lines are ignored.
# One search term per line, at most 200 characters.

rust programming
machine learning basics
web scraping
data science

// add your own terms below
";

/// Write an annotated sample terms file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_sample_terms(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SAMPLE_TERMS)
}
