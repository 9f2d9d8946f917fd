//! Line-by-line interactive term collection.

use std::io::{BufRead, Write};

use tracing::{info, warn};

use crate::query::{DroppedLine, QueryBatch, QueryError, SearchTerm};

fn read_line(input: &mut impl BufRead) -> Result<Option<String>, QueryError> {
    let mut line = String::new();
    let read = input.read_line(&mut line).map_err(QueryError::Interactive)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Collect terms from `input`, prompting on `output`.
///
/// An empty line ends collection once at least one term has been entered; EOF ends
/// it at any time. The operator is then asked to confirm the run. Invalid entries
/// are reported on `output` and recorded in [`QueryBatch::dropped`] with their
/// input line number.
///
/// # Errors
///
/// Returns `QueryError::NoValidTerms` if nothing valid was entered,
/// `QueryError::Declined` if the operator answers no, and
/// `QueryError::Interactive` on I/O failure.
pub fn collect<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
) -> Result<QueryBatch, QueryError> {
    let io_err = QueryError::Interactive;
    let mut terms: Vec<SearchTerm> = Vec::new();
    let mut dropped: Vec<DroppedLine> = Vec::new();
    let mut line_number = 0usize;

    writeln!(output, "Enter one search term per line.").map_err(io_err)?;
    writeln!(output, "Finish with an empty line. Ctrl+C aborts.").map_err(io_err)?;

    loop {
        write!(output, "Term {}: ", terms.len() + 1).map_err(io_err)?;
        output.flush().map_err(io_err)?;

        let Some(line) = read_line(&mut input)? else {
            writeln!(output).map_err(io_err)?;
            break;
        };
        line_number += 1;

        if line.is_empty() {
            if terms.is_empty() {
                writeln!(output, "Enter at least one term.").map_err(io_err)?;
                continue;
            }
            break;
        }

        match SearchTerm::parse(&line) {
            Ok(term) => {
                writeln!(output, "Added: '{term}'").map_err(io_err)?;
                terms.push(term);
            }
            Err(e) => {
                warn!(line = line_number, "Dropping invalid interactive term: {e}");
                writeln!(output, "Invalid term ({e}), try again.").map_err(io_err)?;
                dropped.push(DroppedLine {
                    line: Some(line_number),
                    reason: e.to_string(),
                });
            }
        }
    }

    if terms.is_empty() {
        return Err(QueryError::NoValidTerms("interactive input".to_string()));
    }

    writeln!(output, "{} term(s) entered.", terms.len()).map_err(io_err)?;

    loop {
        write!(output, "Run the search? (y/n): ").map_err(io_err)?;
        output.flush().map_err(io_err)?;

        let Some(answer) = read_line(&mut input)? else {
            return Err(QueryError::Declined);
        };

        match answer.to_lowercase().as_str() {
            "y" | "yes" => break,
            "n" | "no" => return Err(QueryError::Declined),
            _ => writeln!(output, "Please answer 'y' or 'n'.").map_err(io_err)?,
        }
    }

    info!(
        terms = terms.len(),
        dropped = dropped.len(),
        "Interactive input complete"
    );
    Ok(QueryBatch { terms, dropped })
}
