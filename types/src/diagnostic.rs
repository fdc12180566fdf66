use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ServerIdentity;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    /// Callers (boundary code) decide the fallback policy.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which diagnostics survive filtering: everything, or one exact level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeverityFilter {
    #[default]
    All,
    Only(DiagnosticSeverity),
}

impl SeverityFilter {
    #[must_use]
    pub fn matches(self, severity: DiagnosticSeverity) -> bool {
        match self {
            Self::All => true,
            Self::Only(level) => level == severity,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Only(level) => level.label(),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown severity filter '{0}' (expected all, error, warning, info or hint)")]
pub struct SeverityFilterParseError(String);

impl FromStr for SeverityFilter {
    type Err = SeverityFilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "error" | "errors" => Ok(Self::Only(DiagnosticSeverity::Error)),
            "warning" | "warnings" | "warn" => Ok(Self::Only(DiagnosticSeverity::Warning)),
            "info" | "information" => Ok(Self::Only(DiagnosticSeverity::Information)),
            "hint" | "hints" => Ok(Self::Only(DiagnosticSeverity::Hint)),
            _ => Err(SeverityFilterParseError(s.to_string())),
        }
    }
}

/// Zero-based line/character position, as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// A single analyzer-reported issue for a file.
///
/// Fields are private; the wire boundary constructs these and consumers
/// read via accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    range: Range,
    severity: DiagnosticSeverity,
    code: Option<String>,
    /// Tag of the analyzer (or sub-tool) that produced this diagnostic.
    source: Option<String>,
    message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(range: Range, severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            range,
            severity,
            code: None,
            source: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attribute this diagnostic to `identity` unless it already names a source.
    #[must_use]
    pub fn tagged(mut self, identity: ServerIdentity) -> Self {
        if self.source.as_deref().is_none_or(str::is_empty) {
            self.source = Some(identity.name().to_string());
        }
        self
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Format as `path:line:col severity[code](source): message`.
    ///
    /// Line and column are converted to 1-based for display. The `[code]`
    /// segment is omitted when there is no code.
    #[must_use]
    pub fn display_with_path(&self, path: &str) -> String {
        let start = self.range.start;
        let code = self
            .code
            .as_deref()
            .map(|code| format!("[{code}]"))
            .unwrap_or_default();
        format!(
            "{path}:{}:{} {}{code}({}): {}",
            start.line.saturating_add(1),
            start.character.saturating_add(1),
            self.severity.label(),
            self.source.as_deref().unwrap_or("unknown"),
            self.message,
        )
    }
}
