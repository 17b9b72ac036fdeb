//! Configuration for the change watcher.
//!
//! The agent never caches configuration in globals. Every operation asks a
//! [`ConfigProvider`] for an immutable snapshot, and the provider decides,
//! according to its [`RefreshPolicy`], whether to re-read the source first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, WatcherError};

/// Default time between watch-set rescans.
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Full agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Root of the watched tree.
    pub path: PathBuf,

    /// File the process log is appended to.
    pub log_file: PathBuf,

    /// Storage connection parameters.
    pub db: DatabaseConfig,

    /// Regular expressions a path must match (at least one).
    #[serde(default)]
    pub include_regexp: Vec<String>,

    /// Regular expressions a path must not match (any).
    #[serde(default)]
    pub exclude_regexp: Vec<String>,

    /// Shell commands run, in order, for each triggering event.
    #[serde(default)]
    pub commands: Vec<String>,

    /// Seconds between watch-set rescans.
    #[serde(default = "default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,

    /// Per-command timeout in seconds. Unbounded when absent.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Re-read the configuration source on every event.
    #[serde(default = "default_live_reload")]
    pub live_reload: bool,
}

fn default_rescan_interval_secs() -> u64 {
    DEFAULT_RESCAN_INTERVAL.as_secs()
}

fn default_live_reload() -> bool {
    true
}

/// Whole seconds in `duration`, rounded up, at least one.
fn whole_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

impl AgentConfig {
    /// Create a config for `path` with empty pattern and command lists.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            log_file: PathBuf::from("change-watcher.log"),
            db: DatabaseConfig::default(),
            include_regexp: Vec::new(),
            exclude_regexp: Vec::new(),
            commands: Vec::new(),
            rescan_interval_secs: default_rescan_interval_secs(),
            command_timeout_secs: None,
            live_reload: default_live_reload(),
        }
    }

    /// Add an include pattern.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_regexp.push(pattern.into());
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_regexp.push(pattern.into());
        self
    }

    /// Append a command to the sequence.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Set the log file.
    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = log_file.into();
        self
    }

    /// Set the rescan interval, rounded up to whole seconds.
    pub fn with_rescan_interval(mut self, interval: Duration) -> Self {
        self.rescan_interval_secs = whole_secs(interval);
        self
    }

    /// Set the per-command timeout, rounded up to whole seconds.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = Some(whole_secs(timeout));
        self
    }

    /// Parse a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WatcherError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(WatcherError::Config("`path` must not be empty".to_string()));
        }
        if self.rescan_interval_secs == 0 {
            return Err(WatcherError::Config(
                "`rescan_interval_secs` must be greater than zero".to_string(),
            ));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(WatcherError::Config(
                "`command_timeout_secs` must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Time between watch-set rescans. Never shorter than one second.
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs.max(1))
    }

    /// Per-command timeout, if any. A zero timeout means none.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Refresh policy requested by this config.
    pub fn refresh_policy(&self) -> RefreshPolicy {
        if self.live_reload {
            RefreshPolicy::EveryUse
        } else {
            RefreshPolicy::Startup
        }
    }
}

/// Storage connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(alias = "HOST")]
    pub host: String,

    #[serde(alias = "PORT")]
    pub port: u16,

    #[serde(alias = "USER")]
    pub user: String,

    #[serde(alias = "PASSWORD", default)]
    pub password: String,

    #[serde(alias = "DBNAME")]
    pub dbname: String,

    /// TLS mode (`disable`, `prefer`, `require`, `verify-ca`, `verify-full`).
    #[serde(alias = "SSLMODE", default = "default_sslmode")]
    pub sslmode: String,
}

fn default_sslmode() -> String {
    "prefer".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "postgres".to_string(),
            sslmode: default_sslmode(),
        }
    }
}

/// Where configuration snapshots come from.
pub trait ConfigSource: Send + Sync {
    /// Produce a fresh snapshot.
    fn load(&self) -> Result<AgentConfig>;
}

impl<T: ConfigSource + ?Sized> ConfigSource for Arc<T> {
    fn load(&self) -> Result<AgentConfig> {
        (**self).load()
    }
}

/// Reads a YAML file on every load.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<AgentConfig> {
        AgentConfig::from_file(&self.path)
    }
}

/// A fixed, in-memory configuration that can be swapped at runtime.
#[derive(Debug)]
pub struct StaticConfigSource {
    config: std::sync::Mutex<AgentConfig>,
}

impl StaticConfigSource {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config: std::sync::Mutex::new(config),
        }
    }

    /// Replace the config returned by subsequent loads.
    pub fn replace(&self, config: AgentConfig) {
        let mut guard = match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = config;
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<AgentConfig> {
        let guard = match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(guard.clone())
    }
}

/// When a [`ConfigProvider`] re-reads its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Re-read on every call to [`ConfigProvider::current`].
    EveryUse,

    /// Keep the snapshot taken at startup.
    Startup,
}

/// Hands out configuration snapshots according to a refresh policy.
pub struct ConfigProvider {
    source: Box<dyn ConfigSource>,
    policy: RefreshPolicy,
    last_good: RwLock<Arc<AgentConfig>>,
}

impl ConfigProvider {
    /// Load the initial snapshot. Fails if the source cannot be read.
    pub fn new(source: impl ConfigSource + 'static, policy: RefreshPolicy) -> Result<Self> {
        let initial = source.load()?;
        Ok(Self {
            source: Box::new(source),
            policy,
            last_good: RwLock::new(Arc::new(initial)),
        })
    }

    /// Build a provider around an already-loaded snapshot.
    pub fn with_initial(
        source: impl ConfigSource + 'static,
        policy: RefreshPolicy,
        initial: AgentConfig,
    ) -> Self {
        Self {
            source: Box::new(source),
            policy,
            last_good: RwLock::new(Arc::new(initial)),
        }
    }

    /// A provider that always returns `config`.
    pub fn fixed(config: AgentConfig) -> Self {
        Self::with_initial(
            StaticConfigSource::new(config.clone()),
            RefreshPolicy::Startup,
            config,
        )
    }

    /// Current snapshot, reloading first when the policy asks for it.
    ///
    /// A failed reload keeps the previous snapshot.
    pub async fn current(&self) -> Arc<AgentConfig> {
        if self.policy == RefreshPolicy::EveryUse {
            match self.source.load() {
                Ok(config) => {
                    let config = Arc::new(config);
                    *self.last_good.write().await = config.clone();
                    debug!("Reloaded configuration");
                    return config;
                }
                Err(e) => warn!("Failed to reload configuration, keeping previous: {e}"),
            }
        }

        self.last_good.read().await.clone()
    }
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
