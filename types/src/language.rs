use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Language classification of a source file.
///
/// JavaScript and TypeScript are distinct tags but share analyzers and
/// workspace markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Rust,
    Go,
}

impl Language {
    /// Classify a file by its extension. `None` means unsupported.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::from_extension(ext)
    }

    /// Extension lookup is case-insensitive (`Main.TS` is TypeScript).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ts" | "tsx" | "mts" | "cts" => Some(Self::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "py" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Python => "python",
            Self::Rust => "rust",
            Self::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A specific analyzer kind, distinguished by the executable it resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerIdentity {
    /// `typescript-language-server`: type checking for JS/TS.
    TypeScript,
    /// Biome's LSP proxy. Preferred linter when a biome config is present.
    Biome,
    /// `vscode-eslint-language-server`. Legacy linter.
    Eslint,
    Pyright,
    RustAnalyzer,
    Gopls,
}

impl ServerIdentity {
    pub const ALL: [Self; 6] = [
        Self::TypeScript,
        Self::Biome,
        Self::Eslint,
        Self::Pyright,
        Self::RustAnalyzer,
        Self::Gopls,
    ];

    /// Stable name used in config keys, logs and diagnostic source tags.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Biome => "biome",
            Self::Eslint => "eslint",
            Self::Pyright => "pyright",
            Self::RustAnalyzer => "rust-analyzer",
            Self::Gopls => "gopls",
        }
    }

    #[must_use]
    pub fn is_linter(self) -> bool {
        matches!(self, Self::Biome | Self::Eslint)
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown server identity: {0}")]
pub struct UnknownIdentityError(String);

impl FromStr for ServerIdentity {
    type Err = UnknownIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|identity| identity.name() == s)
            .ok_or_else(|| UnknownIdentityError(s.to_string()))
    }
}
