//! Which analyzers serve a language in a given workspace.

use std::path::Path;

use sonar_types::{Language, ServerIdentity};

const BIOME_MARKERS: &[&str] = &["biome.json", "biome.jsonc"];
const ESLINT_MARKERS: &[&str] = &[
    "eslint.config.js",
    "eslint.config.mjs",
    "eslint.config.cjs",
    "eslint.config.ts",
    "eslint.config.mts",
    "eslint.config.cts",
    ".eslintrc",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.json",
    ".eslintrc.yaml",
    ".eslintrc.yml",
];

fn has_any(root: &Path, markers: &[&str]) -> bool {
    markers.iter().any(|marker| root.join(marker).is_file())
}

/// The one linter configured in `root`: biome wins over eslint.
#[must_use]
pub fn linter_for_root(root: &Path) -> Option<ServerIdentity> {
    if has_any(root, BIOME_MARKERS) {
        Some(ServerIdentity::Biome)
    } else if has_any(root, ESLINT_MARKERS) {
        Some(ServerIdentity::Eslint)
    } else {
        None
    }
}

/// Ordered identities to query for `language` in `root`.
#[must_use]
pub fn identities_for_language(language: Language, root: &Path) -> Vec<ServerIdentity> {
    match language {
        Language::JavaScript | Language::TypeScript => {
            let mut identities = vec![ServerIdentity::TypeScript];
            identities.extend(linter_for_root(root));
            identities
        }
        Language::Python => vec![ServerIdentity::Pyright],
        Language::Rust => vec![ServerIdentity::RustAnalyzer],
        Language::Go => vec![ServerIdentity::Gopls],
    }
}
