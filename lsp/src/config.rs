//! Engine configuration, loaded from `~/.sonar/config.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sonar_types::ServerIdentity;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Timeouts in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Ordinary JSON-RPC requests.
    pub request: u64,
    /// The `initialize` handshake; some servers index the project first.
    pub initialize: u64,
    /// The `shutdown` request and the wait for the process to exit.
    pub shutdown: u64,
    /// Quiet period after the last publish before diagnostics count as settled.
    pub debounce: u64,
    /// Upper bound on waiting for diagnostics, published or not.
    pub ceiling: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: 10_000,
            initialize: 30_000,
            shutdown: 2_000,
            debounce: 50,
            ceiling: 5_000,
        }
    }
}

/// Per-identity override, keyed by identity name (`[servers.eslint]`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerOverride {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
}

impl Default for ServerOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            args: None,
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_runner() -> Option<String> {
    Some(String::from("npx"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosisConfig {
    pub timeouts: TimeoutConfig,
    /// Runner that fetches node-distributed analyzers on demand. Empty disables.
    pub bootstrap_runner: Option<String>,
    /// Post-ready crashes tolerated per (identity, root) before quarantine.
    /// Unset means crashed servers are always respawned on the next call.
    pub max_crash_restarts: Option<u32>,
    pub servers: HashMap<String, ServerOverride>,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            bootstrap_runner: default_runner(),
            max_crash_restarts: None,
            servers: HashMap::new(),
        }
    }
}

impl DiagnosisConfig {
    /// Load from the default location. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn server(&self, identity: ServerIdentity) -> Option<&ServerOverride> {
        self.servers.get(identity.name())
    }

    #[must_use]
    pub fn is_enabled(&self, identity: ServerIdentity) -> bool {
        self.server(identity).is_none_or(|s| s.enabled)
    }

    /// Configured bootstrap runner, if any.
    #[must_use]
    pub fn runner(&self) -> Option<&str> {
        self.bootstrap_runner
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    #[must_use]
    pub fn timings(&self) -> Timings {
        Timings::from(&self.timeouts)
    }
}

/// [`TimeoutConfig`] resolved to durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub request: Duration,
    pub initialize: Duration,
    pub shutdown: Duration,
    pub debounce: Duration,
    pub ceiling: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for Timings {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            request: Duration::from_millis(config.request),
            initialize: Duration::from_millis(config.initialize),
            shutdown: Duration::from_millis(config.shutdown),
            debounce: Duration::from_millis(config.debounce),
            ceiling: Duration::from_millis(config.ceiling),
        }
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sonar").join("config.toml"))
}
