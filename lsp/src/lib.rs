//! On-demand diagnostics from external language servers.
//!
//! [`Orchestrator::get_diagnosis_for_file`] classifies a file, finds its
//! workspace, starts (or reuses) the analyzers that apply, and merges what
//! they publish into one filtered report.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod format;
pub mod registry;
pub mod root;

pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod retriever;

mod orchestrator;
mod server;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, DiagnosisConfig, ServerOverride, TimeoutConfig, Timings};
pub use connection::{Connection, DEFAULT_REQUEST_TIMEOUT, Handlers};
pub use error::{DiagnosisError, RpcError};
pub use format::{DEFAULT_MAX_CHARS, DiagnosisReport, TRUNCATION_MARKER};
pub use orchestrator::{Diagnosis, Launcher, Orchestrator, ProcessLauncher};
pub use protocol::{Message, PathToUriError, RequestId, ResponseError, ServerCapabilities};
pub use server::{ResolvedCommand, ServerProcess, resolve_executable};
pub use sonar_types::{
    Diagnostic, DiagnosticSeverity, Language, Position, Range, ServerIdentity, SeverityFilter,
};
