//! Runtime error types.

use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An inbound payload was rejected by the bot's dispatcher.
    #[error(transparent)]
    Dispatch(#[from] ember_framework::DispatchError),

    /// No configured bot has this nick.
    #[error("Bot not found: {0}")]
    BotNotFound(String),

    /// A backend was already attached to this bot.
    #[error("Backend already attached to bot: {0}")]
    BackendExists(String),

    /// A configured bot has no backend to deliver its actions.
    #[error("No backend attached to bot: {0}")]
    MissingBackend(String),

    /// The runtime was started twice.
    #[error("Runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
