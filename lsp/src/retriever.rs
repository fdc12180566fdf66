//! Document open/settle/close cycle against one live server.

use std::path::Path;
use std::time::Duration;

use sonar_types::{Diagnostic, Language};

use crate::config::Timings;
use crate::connection::Connection;
use crate::diagnostics::Settled;
use crate::error::{DiagnosisError, RpcError};
use crate::protocol;
use crate::server::ServerProcess;

/// Sends `didClose` when dropped, so a cancelled retrieval still closes
/// what it opened.
struct OpenDocument<'a> {
    connection: &'a Connection,
    uri: String,
}

impl Drop for OpenDocument<'_> {
    fn drop(&mut self) {
        let params = protocol::did_close_params(&self.uri);
        if let Err(e) = self
            .connection
            .send_notification("textDocument/didClose", Some(params))
        {
            tracing::debug!("didClose for {} not sent: {e}", self.uri);
        }
    }
}

/// Open `path` on `server`, wait for its diagnostics to settle, close it,
/// and return what the server published.
///
/// A server that published nothing by the ceiling but supports pull
/// diagnostics is asked directly before the document is closed. An
/// unreadable file yields an empty list. A server that goes away before
/// publishing fails with [`RpcError::Disposed`].
pub(crate) async fn get_diagnostics(
    server: &ServerProcess,
    path: &Path,
    timings: &Timings,
) -> Result<Vec<Diagnostic>, DiagnosisError> {
    server.wait_ready().await?;

    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), "Skipping unreadable file: {e}");
            return Ok(Vec::new());
        }
    };
    let uri = protocol::path_to_file_uri(path)
        .map_err(|e| DiagnosisError::unavailable(server.identity(), e))?;
    let language = Language::from_path(path).unwrap_or(server.language());

    let store = server.store();
    store.clear(path);
    let mut waiter = store.register_waiter(path);

    let params = protocol::did_open_params(
        uri.as_str(),
        protocol::language_id(path, language),
        1,
        &text,
    );
    server
        .connection()
        .send_notification("textDocument/didOpen", Some(params))?;
    let document = OpenDocument {
        connection: server.connection(),
        uri: uri.to_string(),
    };

    let settled = waiter.settle(timings.debounce, timings.ceiling).await;
    tracing::debug!(server = %server.identity(), path = %path.display(), ?settled, "Diagnostics settled");

    if settled == Settled::Closed && !store.contains(path) {
        return Err(RpcError::Disposed.into());
    }
    let pulled = if settled == Settled::Ceiling
        && !store.contains(path)
        && server.capabilities().is_some_and(|caps| caps.pull_diagnostics)
    {
        pull_diagnostics(server, uri.as_str(), timings.request).await
    } else {
        None
    };

    drop(document);
    drop(waiter);
    let pushed = store.take(path);
    Ok(pulled.unwrap_or(pushed))
}

async fn pull_diagnostics(
    server: &ServerProcess,
    uri: &str,
    timeout: Duration,
) -> Option<Vec<Diagnostic>> {
    let params = protocol::document_diagnostic_params(uri);
    match server
        .connection()
        .send_request("textDocument/diagnostic", Some(params), timeout)
        .await
    {
        Ok(result) => Some(protocol::document_diagnostic_items(result)),
        Err(e) => {
            tracing::debug!(server = %server.identity(), "Pull diagnostics failed: {e}");
            None
        }
    }
}
