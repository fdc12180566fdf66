//! Server handle: owns a child process and manages the LSP lifecycle.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use sonar_types::{Language, ServerIdentity};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{DiagnosisConfig, Timings};
use crate::connection::{Connection, Handlers};
use crate::diagnostics::DocumentStore;
use crate::error::DiagnosisError;
use crate::protocol::{self, PublishDiagnosticsParams, ServerCapabilities};

/// How an identity is launched when nothing is configured for it.
struct LaunchDefaults {
    bin: &'static str,
    args: &'static [&'static str],
    /// npm package carrying `bin`, for the bootstrap runner.
    package: Option<&'static str>,
    /// Project-local bin directories, relative to each ancestor of the root.
    local_dirs: &'static [&'static str],
}

const NODE_BIN: &[&str] = &["node_modules/.bin"];

fn launch_defaults(identity: ServerIdentity) -> LaunchDefaults {
    match identity {
        ServerIdentity::TypeScript => LaunchDefaults {
            bin: "typescript-language-server",
            args: &["--stdio"],
            package: Some("typescript-language-server"),
            local_dirs: NODE_BIN,
        },
        ServerIdentity::Biome => LaunchDefaults {
            bin: "biome",
            args: &["lsp-proxy"],
            package: Some("@biomejs/biome"),
            local_dirs: NODE_BIN,
        },
        ServerIdentity::Eslint => LaunchDefaults {
            bin: "vscode-eslint-language-server",
            args: &["--stdio"],
            package: Some("vscode-langservers-extracted"),
            local_dirs: NODE_BIN,
        },
        ServerIdentity::Pyright => LaunchDefaults {
            bin: "pyright-langserver",
            args: &["--stdio"],
            package: Some("pyright"),
            local_dirs: &["node_modules/.bin", ".venv/bin"],
        },
        ServerIdentity::RustAnalyzer => LaunchDefaults {
            bin: "rust-analyzer",
            args: &[],
            package: None,
            local_dirs: &[],
        },
        ServerIdentity::Gopls => LaunchDefaults {
            bin: "gopls",
            args: &[],
            package: None,
            local_dirs: &[],
        },
    }
}

/// Analyzers that pull client settings during the handshake and stall
/// without an answer.
fn queries_configuration(identity: ServerIdentity) -> bool {
    matches!(
        identity,
        ServerIdentity::Eslint | ServerIdentity::Pyright | ServerIdentity::Biome
    )
}

/// A resolved command line for one analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Find the executable for `identity` in a project rooted at `root`.
///
/// Order: configured override, project-local binary (walking up from
/// `root`), bootstrap runner, `PATH`. `None` when nothing is found or the
/// identity is disabled.
#[must_use]
pub fn resolve_executable(
    identity: ServerIdentity,
    root: &Path,
    config: &DiagnosisConfig,
) -> Option<ResolvedCommand> {
    resolve_with(identity, root, config, |name| which::which(name).ok())
}

fn resolve_with(
    identity: ServerIdentity,
    root: &Path,
    config: &DiagnosisConfig,
    lookup: impl Fn(&str) -> Option<PathBuf>,
) -> Option<ResolvedCommand> {
    if !config.is_enabled(identity) {
        return None;
    }
    let defaults = launch_defaults(identity);
    let overrides = config.server(identity);
    let args = overrides
        .and_then(|o| o.args.clone())
        .unwrap_or_else(|| defaults.args.iter().map(ToString::to_string).collect());

    if let Some(command) = overrides.and_then(|o| o.command.as_deref()) {
        let program = if Path::new(command).components().count() > 1 {
            PathBuf::from(command)
        } else {
            lookup(command).unwrap_or_else(|| PathBuf::from(command))
        };
        return Some(ResolvedCommand { program, args });
    }

    for dir in root.ancestors() {
        for local in defaults.local_dirs {
            let candidate = dir.join(local).join(defaults.bin);
            if candidate.is_file() {
                return Some(ResolvedCommand {
                    program: candidate,
                    args,
                });
            }
        }
    }

    if let Some(package) = defaults.package
        && let Some(runner) = config.runner()
        && let Some(program) = lookup(runner)
    {
        let mut runner_args = vec![
            String::from("--yes"),
            String::from("--package"),
            package.to_string(),
            defaults.bin.to_string(),
        ];
        runner_args.extend(args);
        return Some(ResolvedCommand {
            program,
            args: runner_args,
        });
    }

    lookup(defaults.bin).map(|program| ResolvedCommand { program, args })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// One running analyzer for one workspace root.
pub struct ServerProcess {
    identity: ServerIdentity,
    language: Language,
    root: PathBuf,
    child: tokio::sync::Mutex<Option<Child>>,
    connection: Arc<Connection>,
    store: Arc<DocumentStore>,
    readiness: Arc<watch::Sender<Readiness>>,
    capabilities: Arc<OnceLock<ServerCapabilities>>,
    timings: Timings,
    handshake: JoinHandle<()>,
    close_watch: JoinHandle<()>,
}

impl ServerProcess {
    /// Resolve, start and wire up an analyzer process.
    ///
    /// Returns once the process is running; the handshake continues in the
    /// background and is awaited with [`wait_ready`](Self::wait_ready).
    pub fn spawn(
        identity: ServerIdentity,
        language: Language,
        root: &Path,
        config: &DiagnosisConfig,
    ) -> Result<Self, DiagnosisError> {
        let Some(command) = resolve_executable(identity, root, config) else {
            tracing::debug!(server = %identity, "No executable found");
            return Err(DiagnosisError::unavailable(identity, "executable not found"));
        };

        tracing::info!(
            "Starting LSP server '{identity}' ({}) in {}...",
            command.program.display(),
            root.display()
        );
        let mut child = start_process(&command, root).map_err(|e| {
            tracing::warn!("Failed to start LSP server '{identity}': {e:#}");
            DiagnosisError::unavailable(identity, format!("{e:#}"))
        })?;

        let stdout = child.stdout.take();
        let stdin = child.stdin.take();
        let (Some(stdout), Some(stdin)) = (stdout, stdin) else {
            return Err(DiagnosisError::unavailable(identity, "child stdio not piped"));
        };

        Ok(Self::attach(
            identity,
            language,
            root,
            stdout,
            stdin,
            Some(child),
            config.timings(),
        ))
    }

    /// Wire a server over existing streams and start the handshake.
    pub fn attach<R, W>(
        identity: ServerIdentity,
        language: Language,
        root: &Path,
        reader: R,
        writer: W,
        child: Option<Child>,
        timings: Timings,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let store = Arc::new(DocumentStore::new());
        let connection = Arc::new(Connection::new(
            identity.name(),
            reader,
            writer,
            handlers(identity, &store),
        ));
        let readiness = Arc::new(watch::Sender::new(Readiness::Pending));
        let capabilities = Arc::new(OnceLock::new());

        let handshake = tokio::spawn({
            let connection = connection.clone();
            let readiness = readiness.clone();
            let capabilities = capabilities.clone();
            let root = root.to_path_buf();
            async move {
                match initialize(&connection, &root, timings).await {
                    Ok(caps) => {
                        let _ = capabilities.set(caps);
                        tracing::info!(server = %identity, root = %root.display(), "LSP server ready");
                        readiness.send_replace(Readiness::Ready);
                    }
                    Err(e) => {
                        tracing::warn!("LSP server '{identity}' failed to initialize: {e:#}");
                        readiness.send_replace(Readiness::Failed(format!("{e:#}")));
                    }
                }
            }
        });

        // Waiters resolve at once when the server goes away.
        let close_watch = tokio::spawn({
            let connection = connection.clone();
            let store = store.clone();
            async move {
                connection.closed().await;
                tracing::debug!(server = %identity, "LSP connection closed");
                store.close_waiters();
            }
        });

        Self {
            identity,
            language,
            root: root.to_path_buf(),
            child: tokio::sync::Mutex::new(child),
            connection,
            store,
            readiness,
            capabilities,
            timings,
            handshake,
            close_watch,
        }
    }

    #[must_use]
    pub fn identity(&self) -> ServerIdentity {
        self.identity
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capabilities from the `initialize` result, once ready.
    #[must_use]
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.get().copied()
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Resolves when the handshake finished. Fails with
    /// [`DiagnosisError::ServerUnavailable`] if it did not succeed.
    pub async fn wait_ready(&self) -> Result<(), DiagnosisError> {
        let mut rx = self.readiness.subscribe();
        let state = rx
            .wait_for(|state| *state != Readiness::Pending)
            .await
            .map(|state| state.clone());
        match state {
            Ok(Readiness::Ready) => Ok(()),
            Ok(Readiness::Failed(reason)) => {
                Err(DiagnosisError::unavailable(self.identity, reason))
            }
            Ok(Readiness::Pending) | Err(_) => Err(DiagnosisError::unavailable(
                self.identity,
                "handshake aborted",
            )),
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.connection.is_closed()
    }

    /// Resolves once the server's output closes, whether it exited, crashed
    /// or was shut down. Not tied to a borrow of the server.
    pub(crate) fn exit_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.connection.subscribe_closed();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    /// Best-effort orderly stop. Errors are swallowed.
    ///
    /// A handshake still in flight is abandoned and its waiters see the
    /// server as unavailable.
    pub async fn shutdown(&self) {
        if self.is_alive() {
            let _ = self
                .connection
                .send_request("shutdown", None, self.timings.shutdown)
                .await;
            let _ = self.connection.send_notification("exit", None);
        }
        self.connection.dispose();
        self.handshake.abort();
        self.readiness.send_if_modified(|state| {
            if *state == Readiness::Pending {
                *state = Readiness::Failed(String::from("shut down during handshake"));
                true
            } else {
                false
            }
        });

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            let waited = tokio::time::timeout(self.timings.shutdown, child.wait()).await;
            if waited.is_err() {
                tracing::debug!("LSP '{}' didn't exit in time, killing", self.identity);
                let _ = child.kill().await;
            }
        }
        tracing::info!(server = %self.identity, "LSP server stopped");
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.handshake.abort();
        self.close_watch.abort();
    }
}

fn start_process(command: &ResolvedCommand, root: &Path) -> Result<Child> {
    Command::new(&command.program)
        .args(&command.args)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {}", command.program.display()))
}

fn handlers(identity: ServerIdentity, store: &Arc<DocumentStore>) -> Handlers {
    let store = store.clone();
    let handlers = Handlers::new().on_notification(move |method, params| match method {
        "textDocument/publishDiagnostics" => publish_diagnostics(identity, &store, params),
        _ => tracing::trace!("Ignoring notification from '{identity}': {method}"),
    });

    if queries_configuration(identity) {
        handlers.on_request("workspace/configuration", move |params| {
            let reply = protocol::configuration_response(identity, params.as_ref());
            async move { reply }
        })
    } else {
        handlers
    }
}

fn publish_diagnostics(identity: ServerIdentity, store: &DocumentStore, params: Option<Value>) {
    let Some(params) = params else { return };
    match serde_json::from_value::<PublishDiagnosticsParams>(params) {
        Ok(params) => {
            let Some(path) = protocol::file_uri_to_path(&params.uri) else {
                tracing::debug!("LSP '{identity}' published for non-file URI {}", params.uri);
                return;
            };
            let items = params
                .diagnostics
                .into_iter()
                .map(protocol::LspDiagnostic::into_diagnostic)
                .collect::<Vec<_>>();
            tracing::trace!(server = %identity, path = %path.display(), count = items.len(), "publishDiagnostics");
            store.publish(path, items);
        }
        Err(e) => {
            tracing::debug!("Failed to parse publishDiagnostics from '{identity}': {e}");
        }
    }
}

async fn initialize(connection: &Connection, root: &Path, timings: Timings) -> Result<ServerCapabilities> {
    let root_uri =
        protocol::path_to_file_uri(root).context("converting workspace root to URI")?;

    let params = protocol::initialize_params(root_uri.as_str(), root);
    let result = connection
        .send_request("initialize", Some(params), timings.initialize)
        .await
        .context("LSP initialize failed")?;

    connection
        .send_notification("initialized", Some(json!({})))
        .context("sending initialized")?;

    Ok(ServerCapabilities::from_initialize_result(&result))
}
