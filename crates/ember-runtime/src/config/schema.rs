//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ember_core::BotIdentity;
use ember_framework::{ManagerConfig, StorageConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmberConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Individual bot configurations.
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

impl EmberConfig {
    /// The dispatch settings handed to every bot's plugin manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            worker_threads: self.dispatch.worker_threads,
            storage: self.storage.to_storage_config(),
        }
    }

    pub fn bot(&self, nick: &str) -> Option<&BotConfig> {
        self.bots.iter().find(|b| b.nick == nick)
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Written to `file_path`.
    File,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread ids in each line.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line number in each line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `ember_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Storage & dispatch
// =============================================================================

/// Where plugin storages live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_suffix")]
    pub suffix: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            suffix: default_suffix(),
        }
    }
}

impl StorageSection {
    pub fn to_storage_config(&self) -> StorageConfig {
        StorageConfig {
            data_dir: self.data_dir.clone(),
            suffix: self.suffix.clone(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_suffix() -> String {
    ".db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Size of the worker pool shared by threaded handlers and tasks.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

fn default_worker_threads() -> usize {
    10
}

// =============================================================================
// Bots
// =============================================================================

/// Individual bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Unique nick; also names the bot's storage directory.
    pub nick: String,

    #[serde(default = "default_command_token")]
    pub command_token: String,

    /// Rooms targeted by actions that have no triggering event.
    #[serde(default)]
    pub rooms: Vec<String>,

    /// Modules to load. Absent means every installed module.
    #[serde(default)]
    pub enabled_plugins: Option<Vec<String>>,

    /// Per-plugin configuration tables, keyed by plugin or module name.
    #[serde(default)]
    pub plugins: Map<String, Value>,
}

impl BotConfig {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            command_token: default_command_token(),
            rooms: Vec::new(),
            enabled_plugins: None,
            plugins: Map::new(),
        }
    }

    pub fn identity(&self) -> Arc<BotIdentity> {
        Arc::new(
            BotIdentity::new(&self.nick)
                .with_command_token(&self.command_token)
                .with_default_rooms(self.rooms.iter().cloned()),
        )
    }
}

fn default_command_token() -> String {
    "!".to_string()
}
