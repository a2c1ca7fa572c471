//! Error types for the Ember framework.

use ember_core::EventError;
use thiserror::Error;

/// Boxed error returned by handlers, tasks and plugin hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building the registry.
///
/// None of these are fatal: the manager logs them and leaves the offending
/// parser or plugin out.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// Neither the supplied pattern nor the `^name$` fallback compiled.
    #[error("parser '{name}' has no usable trigger: {reason}")]
    InvalidPattern {
        /// Handler name.
        name: String,
        /// Compiler message for the fallback pattern.
        reason: String,
    },

    /// A plugin constructor returned an error.
    #[error("failed to construct plugin '{plugin}': {reason}")]
    PluginConstruction { plugin: String, reason: String },

    /// A plugin's `setup` hook returned an error.
    #[error("setup of plugin '{plugin}' failed: {reason}")]
    PluginSetup { plugin: String, reason: String },
}

/// A handler or task invocation that produced no reply.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler returned `Err`.
    #[error("handler '{label}' failed: {reason}")]
    Failed { label: String, reason: String },

    /// The handler panicked.
    #[error("handler '{label}' panicked: {message}")]
    Panicked { label: String, message: String },

    /// The worker pool went away before the job finished.
    #[error("worker pool closed before '{label}' completed")]
    PoolClosed { label: String },
}

/// Errors from persistent plugin storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `close_storage` was called for a name that is not open.
    #[error("no storage called '{0}' found")]
    NotFound(String),

    /// A path component would place the store outside the data directory.
    #[error("invalid storage name component '{0}'")]
    InvalidName(String),

    /// The store was used after being closed.
    #[error("storage '{0}' is closed")]
    Closed(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode or decode stored value: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by [`PluginManager::process_event`](crate::PluginManager::process_event).
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The event was not well formed.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] EventError),
}

/// Result type for registration.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for dispatch.
pub type DispatchResult<T> = Result<T, DispatchError>;
