//! Bot identity and the outbound backend boundary.
//!
//! A [`BotIdentity`] describes one bot: the nick it uses on the network, the
//! token that prefixes commands, and the rooms it talks to when an action has
//! no triggering event. Events keep a `Weak` reference to it.
//!
//! A [`Backend`] is the protocol side of a bot. It receives fully-formed
//! [`Action`]s and is responsible for putting them on the wire.

use std::sync::Arc;

use async_trait::async_trait;

use crate::action::Action;
use crate::error::BackendResult;

/// Static description of a bot instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    nick: String,
    command_token: String,
    default_rooms: Vec<String>,
}

impl BotIdentity {
    /// Creates an identity with the default `!` command token and no rooms.
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            command_token: "!".to_string(),
            default_rooms: Vec::new(),
        }
    }

    /// Sets the command token (builder pattern).
    pub fn with_command_token(mut self, token: impl Into<String>) -> Self {
        self.command_token = token.into();
        self
    }

    /// Sets the rooms used for actions without a triggering event.
    pub fn with_default_rooms<I, S>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_rooms = rooms.into_iter().map(Into::into).collect();
        self
    }

    /// The bot's nick on the network.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// The prefix that turns a message into a command.
    pub fn command_token(&self) -> &str {
        &self.command_token
    }

    /// Rooms targeted by self-initiated actions.
    pub fn default_rooms(&self) -> &[String] {
        &self.default_rooms
    }
}

/// The protocol side of a bot.
///
/// Implementations translate actions into protocol messages. An action whose
/// `destination_rooms` is empty must be treated as a no-op, not an error.
///
/// # Example Implementation
///
/// ```rust,ignore
/// struct ConsoleBackend;
///
/// #[async_trait]
/// impl Backend for ConsoleBackend {
///     fn name(&self) -> &str {
///         "console"
///     }
///
///     async fn handle_action(&self, action: Action) -> BackendResult<()> {
///         for room in action.destination_rooms() {
///             println!("[{room}] {}", action.body().unwrap_or_default());
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Returns the backend's name (used in logs).
    fn name(&self) -> &str;

    /// Delivers one action.
    async fn handle_action(&self, action: Action) -> BackendResult<()>;
}

/// A shared backend trait object.
pub type BoxedBackend = Arc<dyn Backend>;
