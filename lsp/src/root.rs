//! Language classification and workspace root discovery.

use std::path::{Path, PathBuf};

use sonar_types::Language;

const ECMASCRIPT_MARKERS: &[&str] = &["tsconfig.json", "jsconfig.json", "package.json"];
const PYTHON_MARKERS: &[&str] = &[
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "pyrightconfig.json",
    "requirements.txt",
    "Pipfile",
];
const RUST_MARKERS: &[&str] = &["Cargo.toml"];
const GO_MARKERS: &[&str] = &["go.work", "go.mod"];

/// Language of `path` by extension, `None` if unsupported.
#[must_use]
pub fn classify(path: &Path) -> Option<Language> {
    Language::from_path(path)
}

/// Files whose presence marks a workspace root for `language`.
#[must_use]
pub fn root_markers(language: Language) -> &'static [&'static str] {
    match language {
        Language::JavaScript | Language::TypeScript => ECMASCRIPT_MARKERS,
        Language::Python => PYTHON_MARKERS,
        Language::Rust => RUST_MARKERS,
        Language::Go => GO_MARKERS,
    }
}

/// Nearest ancestor of `path` holding one of the language's markers.
#[must_use]
pub fn find_root(path: &Path, language: Language) -> Option<PathBuf> {
    let markers = root_markers(language);
    path.parent()?
        .ancestors()
        .find(|dir| markers.iter().any(|marker| dir.join(marker).is_file()))
        .map(Path::to_path_buf)
}
