//! In-memory language server for tests.
//!
//! Speaks real framed JSON-RPC over a `tokio::io::duplex` pipe so tests
//! exercise the production [`Connection`](crate::connection::Connection) and
//! [`ServerProcess`](crate::server::ServerProcess) end to end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use sonar_types::{Language, ServerIdentity};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Notify;

use crate::codec::{FrameReader, FrameWriter};
use crate::config::Timings;
use crate::protocol;
use crate::server::ServerProcess;

/// What the fake server does with the traffic it receives.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBehavior {
    /// Reply to `initialize` with an error.
    pub fail_initialize: bool,
    /// Never answer `initialize`.
    pub hang_initialize: bool,
    /// Ask the client for `workspace/configuration` before answering `initialize`.
    pub request_configuration: bool,
    /// Raw LSP diagnostics published on `didOpen`. Paths not listed stay silent.
    pub diagnostics: HashMap<PathBuf, Vec<Value>>,
    /// Publish an empty list first, then the real one after this delay.
    pub publish_in_two_steps: Option<Duration>,
    /// Drop the pipe on the first `didOpen`.
    pub crash_on_open: bool,
    /// Advertise `diagnosticProvider` and answer `textDocument/diagnostic`
    /// with these items. Nothing is pushed.
    pub pull_items: Option<Vec<Value>>,
}

impl FakeBehavior {
    pub fn with_diagnostics(mut self, path: &Path, diagnostics: Vec<Value>) -> Self {
        self.diagnostics.insert(path.to_path_buf(), diagnostics);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeStats {
    pub did_open: AtomicUsize,
    pub did_close: AtomicUsize,
    pub shutdown: AtomicUsize,
    pub exit: AtomicUsize,
    pub pulls: AtomicUsize,
    pub configuration_reply: Mutex<Option<Value>>,
}

impl FakeStats {
    pub fn did_open(&self) -> usize {
        self.did_open.load(Ordering::SeqCst)
    }

    pub fn did_close(&self) -> usize {
        self.did_close.load(Ordering::SeqCst)
    }

    pub fn configuration_reply(&self) -> Option<Value> {
        self.configuration_reply.lock().unwrap().clone()
    }
}

/// Handle on a running fake server.
#[derive(Clone)]
pub(crate) struct FakeServer {
    pub stats: Arc<FakeStats>,
    crash: Arc<Notify>,
}

impl FakeServer {
    /// Drop the pipe as if the process died.
    pub fn crash(&self) {
        self.crash.notify_one();
    }
}

pub(crate) type ClientEnd = (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>);

/// Start a fake server; returns its handle and the client side of the pipe.
pub(crate) fn fake_server(behavior: FakeBehavior) -> (FakeServer, ClientEnd) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let stats = Arc::new(FakeStats::default());
    let crash = Arc::new(Notify::new());

    tokio::spawn(run(server, behavior, stats.clone(), crash.clone()));

    (FakeServer { stats, crash }, tokio::io::split(client))
}

/// Attach a [`ServerProcess`] to a fresh fake server.
pub(crate) fn fake_process(
    identity: ServerIdentity,
    language: Language,
    root: &Path,
    behavior: FakeBehavior,
    timings: Timings,
) -> (ServerProcess, FakeServer) {
    let (fake, (reader, writer)) = fake_server(behavior);
    let process = ServerProcess::attach(identity, language, root, reader, writer, None, timings);
    (process, fake)
}

/// Fast timings so ceiling-bound tests finish quickly.
pub(crate) fn fast_timings() -> Timings {
    Timings {
        request: Duration::from_secs(2),
        initialize: Duration::from_secs(2),
        shutdown: Duration::from_millis(200),
        debounce: Duration::from_millis(20),
        ceiling: Duration::from_millis(300),
    }
}

/// Poll `condition` until it holds or a second passes.
pub(crate) async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn diagnostic(line: u32, severity: u64, message: &str) -> Value {
    json!({
        "range": {
            "start": { "line": line, "character": 0 },
            "end": { "line": line, "character": 1 }
        },
        "severity": severity,
        "message": message
    })
}

pub(crate) fn error_at(line: u32, message: &str) -> Value {
    diagnostic(line, 1, message)
}

pub(crate) fn warning_at(line: u32, message: &str) -> Value {
    diagnostic(line, 2, message)
}

async fn run(stream: DuplexStream, behavior: FakeBehavior, stats: Arc<FakeStats>, crash: Arc<Notify>) {
    let (read, write) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write);

    loop {
        let frame = tokio::select! {
            () = crash.notified() => return,
            frame = reader.read_frame() => frame,
        };
        let Ok(Some(frame)) = frame else { return };

        let method = frame["method"].as_str().unwrap_or_default().to_string();
        let id = frame.get("id").cloned();

        match (method.as_str(), id) {
            // Reply to our own configuration request.
            ("", Some(_)) => {
                *stats.configuration_reply.lock().unwrap() = frame.get("result").cloned();
            }
            ("initialize", Some(id)) => {
                if behavior.request_configuration {
                    let request = json!({
                        "jsonrpc": "2.0",
                        "id": "cfg-1",
                        "method": "workspace/configuration",
                        "params": { "items": [{ "section": "python.analysis" }, { "section": "other" }] }
                    });
                    if writer.write_frame(&request).await.is_err() {
                        return;
                    }
                }
                if behavior.hang_initialize {
                    continue;
                }
                let capabilities = if behavior.pull_items.is_some() {
                    json!({ "textDocumentSync": 1, "diagnosticProvider": { "interFileDependencies": false } })
                } else {
                    json!({ "textDocumentSync": 1 })
                };
                let reply = if behavior.fail_initialize {
                    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32603, "message": "boom" } })
                } else {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "capabilities": capabilities }
                    })
                };
                if writer.write_frame(&reply).await.is_err() {
                    return;
                }
            }
            ("textDocument/didOpen", None) => {
                stats.did_open.fetch_add(1, Ordering::SeqCst);
                if behavior.crash_on_open {
                    return;
                }
                let uri = frame["params"]["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let path = protocol::file_uri_to_path(&uri).unwrap_or_default();
                let Some(items) = behavior.diagnostics.get(&path) else {
                    continue;
                };
                if let Some(delay) = behavior.publish_in_two_steps {
                    if writer.write_frame(&publish(&uri, &[])).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                }
                if writer.write_frame(&publish(&uri, items)).await.is_err() {
                    return;
                }
            }
            ("textDocument/didClose", None) => {
                stats.did_close.fetch_add(1, Ordering::SeqCst);
            }
            ("shutdown", Some(id)) => {
                stats.shutdown.fetch_add(1, Ordering::SeqCst);
                let reply = json!({ "jsonrpc": "2.0", "id": id, "result": null });
                if writer.write_frame(&reply).await.is_err() {
                    return;
                }
            }
            ("textDocument/diagnostic", Some(id)) => {
                stats.pulls.fetch_add(1, Ordering::SeqCst);
                let items = behavior.pull_items.clone().unwrap_or_default();
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "kind": "full", "items": items }
                });
                if writer.write_frame(&reply).await.is_err() {
                    return;
                }
            }
            ("exit", None) => {
                stats.exit.fetch_add(1, Ordering::SeqCst);
                return;
            }
            (_, Some(id)) => {
                let reply = json!({ "jsonrpc": "2.0", "id": id, "result": null });
                if writer.write_frame(&reply).await.is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

fn publish(uri: &str, items: &[Value]) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": { "uri": uri, "diagnostics": items }
    })
}
