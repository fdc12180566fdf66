//! Single entry point: one file in, merged diagnostics out.
//!
//! The orchestrator owns the server cache. Servers are spawned lazily per
//! `(identity, root)`, reused across calls, evicted when they exit and
//! quarantined for good when they fail to start.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use sonar_types::{Diagnostic, Language, SeverityFilter, ServerIdentity};
use tokio::sync::Mutex;

use crate::config::DiagnosisConfig;
use crate::error::DiagnosisError;
use crate::server::ServerProcess;
use crate::{format, protocol, registry, retriever, root};

/// Starts analyzer processes. Swapped out in tests for in-memory servers.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        identity: ServerIdentity,
        language: Language,
        root: &Path,
        config: &DiagnosisConfig,
    ) -> Result<ServerProcess, DiagnosisError>;
}

/// Spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        identity: ServerIdentity,
        language: Language,
        root: &Path,
        config: &DiagnosisConfig,
    ) -> Result<ServerProcess, DiagnosisError> {
        ServerProcess::spawn(identity, language, root, config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ServerKey {
    identity: ServerIdentity,
    root: PathBuf,
}

#[derive(Default)]
struct ServerCache {
    live: HashMap<ServerKey, Arc<ServerProcess>>,
    /// Launched, handshake still running.
    starting: HashMap<ServerKey, Arc<ServerProcess>>,
    quarantined: HashSet<ServerKey>,
    crashes: HashMap<ServerKey, u32>,
}

impl ServerCache {
    /// Drop a server that died after becoming ready, quarantining its key
    /// once it has crashed `max_crashes` times.
    fn evict_crashed(&mut self, key: &ServerKey, max_crashes: Option<u32>) {
        self.live.remove(key);
        let crashes = self.crashes.entry(key.clone()).or_insert(0);
        *crashes += 1;
        tracing::info!(server = %key.identity, root = %key.root.display(), crashes = *crashes, "LSP server exited");
        if max_crashes.is_some_and(|max| *crashes >= max) {
            tracing::warn!(
                "LSP server '{}' crashed {} times, not restarting",
                key.identity,
                *crashes
            );
            self.quarantined.insert(key.clone());
        }
    }
}

enum Acquired {
    Live(Arc<ServerProcess>),
    /// Another call launched it and owns its handshake.
    Starting(Arc<ServerProcess>),
    Launched(ServerKey, Arc<ServerProcess>),
}

/// Result of one orchestrated call.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    path: PathBuf,
    servers: Vec<ServerIdentity>,
    diagnostics: Vec<Diagnostic>,
    text: String,
}

impl Diagnosis {
    /// Absolute, normalized path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Servers that were queried, in registry order.
    #[must_use]
    pub fn servers(&self) -> &[ServerIdentity] {
        &self.servers
    }

    /// Tagged diagnostics that passed the severity filter.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Rendered, possibly truncated output.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

pub struct Orchestrator {
    config: Arc<DiagnosisConfig>,
    working_dir: PathBuf,
    launcher: Arc<dyn Launcher>,
    cache: Arc<Mutex<ServerCache>>,
}

impl Orchestrator {
    /// Relative paths and files outside any workspace resolve against
    /// `working_dir`.
    pub fn new(config: DiagnosisConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self::with_launcher(config, working_dir, Arc::new(ProcessLauncher))
    }

    pub fn with_launcher(
        config: DiagnosisConfig,
        working_dir: impl Into<PathBuf>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            working_dir: protocol::normalize_path(&working_dir.into()),
            launcher,
            cache: Arc::new(Mutex::new(ServerCache::default())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DiagnosisConfig {
        &self.config
    }

    /// Diagnostics for `path` from every analyzer that applies to it.
    ///
    /// Failures of individual servers are logged and skipped; only an
    /// unsupported file or the absence of any working server is an error.
    pub async fn get_diagnosis_for_file(
        &self,
        path: &Path,
        filter: SeverityFilter,
        max_chars: usize,
    ) -> Result<Diagnosis, DiagnosisError> {
        let path = protocol::normalize_path(&self.working_dir.join(path));
        let Some(language) = root::classify(&path) else {
            return Err(DiagnosisError::UnsupportedLanguage { path });
        };
        let root = root::find_root(&path, language).unwrap_or_else(|| self.working_dir.clone());
        let identities = registry::identities_for_language(language, &root);
        tracing::debug!(path = %path.display(), root = %root.display(), ?identities, "Diagnosing");

        let servers = self.acquire(&identities, language, &root).await;
        if servers.is_empty() {
            return Err(DiagnosisError::NoServerAvailable {
                path,
                tried: identities,
            });
        }

        let timings = self.config.timings();
        let results = join_all(servers.iter().map(|server| {
            let path = &path;
            async move {
                let result = retriever::get_diagnostics(server, path, &timings).await;
                (server.identity(), result)
            }
        }))
        .await;

        let mut diagnostics = Vec::new();
        for (identity, result) in results {
            match result {
                Ok(items) => {
                    diagnostics.extend(items.into_iter().map(|diag| diag.tagged(identity)));
                }
                Err(e) => {
                    tracing::warn!(server = %identity, path = %path.display(), "Diagnostics request failed: {e}");
                }
            }
        }
        diagnostics.retain(|diag| filter.matches(diag.severity()));

        let display_path = self.display_path(&path);
        let text = if diagnostics.is_empty() {
            format::no_diagnostics(&display_path, filter)
        } else {
            format::truncate(format::render(&display_path, &diagnostics), max_chars)
        };

        Ok(Diagnosis {
            path,
            servers: servers.iter().map(|server| server.identity()).collect(),
            diagnostics,
            text,
        })
    }

    /// Stop every cached server and forget quarantine and crash history.
    pub async fn shutdown_all(&self) {
        let servers: Vec<_> = {
            let mut cache = self.cache.lock().await;
            cache.quarantined.clear();
            cache.crashes.clear();
            let starting: Vec<_> = cache.starting.drain().map(|(_, server)| server).collect();
            cache
                .live
                .drain()
                .map(|(_, server)| server)
                .chain(starting)
                .collect()
        };
        if !servers.is_empty() {
            tracing::info!("Shutting down {} LSP server(s)", servers.len());
        }
        join_all(servers.iter().map(|server| server.shutdown())).await;
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.working_dir)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// Live, ready servers for `identities`, spawning as needed.
    ///
    /// New servers are reserved in `starting` under the cache lock, so each
    /// key gets at most one instance. Handshakes run with the lock released.
    async fn acquire(
        &self,
        identities: &[ServerIdentity],
        language: Language,
        root: &Path,
    ) -> Vec<Arc<ServerProcess>> {
        let mut acquired = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            for &identity in identities {
                let key = ServerKey {
                    identity,
                    root: root.to_path_buf(),
                };

                if let Some(server) = cache.live.get(&key) {
                    if server.is_alive() {
                        acquired.push(Acquired::Live(server.clone()));
                        continue;
                    }
                    cache.evict_crashed(&key, self.config.max_crash_restarts);
                }
                if cache.quarantined.contains(&key) {
                    tracing::debug!(server = %identity, root = %root.display(), "Skipping quarantined server");
                    continue;
                }
                if let Some(server) = cache.starting.get(&key) {
                    acquired.push(Acquired::Starting(server.clone()));
                    continue;
                }

                match self.launcher.launch(identity, language, root, &self.config) {
                    Ok(server) => {
                        let server = Arc::new(server);
                        cache.starting.insert(key.clone(), server.clone());
                        acquired.push(Acquired::Launched(key, server));
                    }
                    Err(e) => {
                        tracing::warn!("LSP server '{identity}' unavailable: {e}");
                        cache.quarantined.insert(key);
                    }
                }
            }
        }

        join_all(acquired.into_iter().map(|entry| self.ready(entry)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Wait out the handshake of one acquired server. The caller that
    /// launched it promotes it to `live` or quarantines its key.
    async fn ready(&self, acquired: Acquired) -> Option<Arc<ServerProcess>> {
        let (key, server) = match acquired {
            Acquired::Live(server) => return Some(server),
            Acquired::Starting(server) => {
                let ready = server.wait_ready().await;
                return ready.ok().map(|()| server);
            }
            Acquired::Launched(key, server) => (key, server),
        };

        let outcome = server.wait_ready().await;
        let mut cache = self.cache.lock().await;
        // `shutdown_all` may have taken it while the lock was released.
        let owned = cache
            .starting
            .get(&key)
            .is_some_and(|starting| Arc::ptr_eq(starting, &server));
        if owned {
            cache.starting.remove(&key);
        }

        match outcome {
            Ok(()) if owned => {
                self.watch_exit(key.clone(), &server);
                cache.live.insert(key, server.clone());
                Some(server)
            }
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("{e}");
                if owned {
                    cache.quarantined.insert(key);
                }
                drop(cache);
                server.shutdown().await;
                None
            }
        }
    }

    /// Evict this exact instance when it exits.
    fn watch_exit(&self, key: ServerKey, server: &Arc<ServerProcess>) {
        let exited = server.exit_signal();
        let instance = Arc::downgrade(server);
        let cache = Arc::downgrade(&self.cache);
        let max_crashes = self.config.max_crash_restarts;

        tokio::spawn(async move {
            exited.await;
            let Some(cache) = cache.upgrade() else { return };
            let mut cache = cache.lock().await;
            let is_same = cache
                .live
                .get(&key)
                .is_some_and(|live| Weak::ptr_eq(&Arc::downgrade(live), &instance));
            if is_same {
                cache.evict_crashed(&key, max_crashes);
            }
        });
    }

    #[cfg(test)]
    async fn live_count(&self) -> usize {
        self.cache.lock().await.live.len()
    }

    #[cfg(test)]
    async fn is_quarantined(&self, identity: ServerIdentity, root: &Path) -> bool {
        self.cache.lock().await.quarantined.contains(&ServerKey {
            identity,
            root: root.to_path_buf(),
        })
    }
}
