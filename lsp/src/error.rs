//! Error taxonomy for the diagnostics engine.
//!
//! [`RpcError`] is scoped to a single request on a single connection and is
//! absorbed by the orchestrator. [`DiagnosisError`] is what callers of
//! [`Orchestrator::get_diagnosis_for_file`](crate::Orchestrator::get_diagnosis_for_file)
//! can observe.

use std::path::PathBuf;
use std::time::Duration;

use sonar_types::ServerIdentity;

/// Failure of one JSON-RPC request. Every request resolves to exactly one
/// outcome: a result, or one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("request '{method}' timed out after {}ms", timeout.as_millis())]
    Timeout { method: String, timeout: Duration },
    #[error("server returned error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("connection disposed")]
    Disposed,
}

#[derive(Debug, thiserror::Error)]
pub enum DiagnosisError {
    #[error("unsupported language for {}", path.display())]
    UnsupportedLanguage { path: PathBuf },
    #[error("no language server available for {} (tried: {})", path.display(), join_identities(tried))]
    NoServerAvailable {
        path: PathBuf,
        tried: Vec<ServerIdentity>,
    },
    #[error("{identity} unavailable: {reason}")]
    ServerUnavailable {
        identity: ServerIdentity,
        reason: String,
    },
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl DiagnosisError {
    pub(crate) fn unavailable(identity: ServerIdentity, reason: impl ToString) -> Self {
        Self::ServerUnavailable {
            identity,
            reason: reason.to_string(),
        }
    }
}

fn join_identities(identities: &[ServerIdentity]) -> String {
    if identities.is_empty() {
        return String::from("none");
    }
    identities
        .iter()
        .map(|identity| identity.name())
        .collect::<Vec<_>>()
        .join(", ")
}
