//! Plain-text rendering of diagnosis results.

use sonar_types::{Diagnostic, SeverityFilter, ServerIdentity};

use crate::error::DiagnosisError;
use crate::orchestrator::Diagnosis;

/// Appended when output is cut at the character limit.
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Default character limit for rendered output.
pub const DEFAULT_MAX_CHARS: usize = 10_000;

/// One line per diagnostic: `path:line:col severity[code](source): message`.
#[must_use]
pub fn render(display_path: &str, diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diag| diag.display_with_path(display_path))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text for a file with nothing left after filtering.
#[must_use]
pub fn no_diagnostics(display_path: &str, filter: SeverityFilter) -> String {
    match filter {
        SeverityFilter::All => format!("No diagnostics for {display_path}"),
        SeverityFilter::Only(level) => format!("No {level} diagnostics for {display_path}"),
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
#[must_use]
pub fn truncate(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut cut = text;
            cut.truncate(byte_idx);
            cut.push_str(TRUNCATION_MARKER);
            cut
        }
        None => text,
    }
}

/// Flat result shape for hosts that only relay text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisReport {
    pub text: String,
    /// `false` only when the call itself failed.
    pub ok: bool,
    pub servers_tried: Vec<ServerIdentity>,
}

impl From<Result<Diagnosis, DiagnosisError>> for DiagnosisReport {
    fn from(result: Result<Diagnosis, DiagnosisError>) -> Self {
        match result {
            Ok(diagnosis) => Self {
                text: diagnosis.text().to_string(),
                ok: true,
                servers_tried: diagnosis.servers().to_vec(),
            },
            Err(e) => {
                let servers_tried = match &e {
                    DiagnosisError::NoServerAvailable { tried, .. } => tried.clone(),
                    _ => Vec::new(),
                };
                Self {
                    text: e.to_string(),
                    ok: false,
                    servers_tried,
                }
            }
        }
    }
}
