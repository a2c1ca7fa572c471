//! Normalized inbound events.
//!
//! Backends hand the core a [`RawEvent`] (usually deserialized straight from
//! a JSON-like mapping) and the core turns it into an [`Event`]:
//!
//! ```rust,ignore
//! let bot = Arc::new(BotIdentity::new("ember"));
//! let event = Event::from_value(
//!     json!({
//!         "type": "message",
//!         "scope": "public",
//!         "room": "lobby@conference.example.org",
//!         "meta": { "nick": "alice", "body": "!ping", "recipients": [] }
//!     }),
//!     &bot,
//! )?;
//!
//! assert_eq!(event.event_type(), &EventType::Cmd);
//! assert_eq!(event.cmd(), Some("ping"));
//! ```
//!
//! A message whose body starts with the bot's command token is promoted to a
//! command event: the first word after the token becomes `cmd` and the
//! remaining words become `args`.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::bot::BotIdentity;
use crate::error::{EventError, EventResult};

// ============================================================================
// Event Type Classification
// ============================================================================

/// The type of an event, used as the dispatch registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// A command (`!name args...`).
    Cmd,
    /// A plain chat message.
    Message,
    /// A protocol-defined event type.
    Custom(String),
}

impl EventType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cmd => "cmd",
            Self::Message => "message",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "cmd" => Self::Cmd,
            "message" => Self::Message,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event happened in a room or in a direct conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Room / channel traffic.
    #[default]
    Public,
    /// Direct messages.
    Private,
}

impl FromStr for Scope {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(EventError::InvalidScope(other.to_string())),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Private => f.write_str("private"),
        }
    }
}

// ============================================================================
// Raw payload
// ============================================================================

/// The mapping a backend produces for each inbound occurrence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event type name (`type` on the wire, `event_type` accepted as well).
    #[serde(rename = "type", alias = "event_type", default)]
    pub event_type: Option<String>,
    /// `public` or `private`; defaults to `public`.
    #[serde(default)]
    pub scope: Option<String>,
    /// Room the event came from.
    #[serde(default)]
    pub room: Option<String>,
    /// How the bot saw the event (`room`, `highlight`, ...).
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form metadata: `body`, `recipients`, `nick`, ...
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// Set when the bot itself produced the event.
    #[serde(default)]
    pub from_bot: bool,
}

// ============================================================================
// Event
// ============================================================================

/// One normalized inbound occurrence.
///
/// Fields are private so the invariants hold after construction: the type is
/// always set and a command event always carries a non-empty `cmd`.
#[derive(Debug, Clone)]
pub struct Event {
    event_type: EventType,
    scope: Scope,
    room: Option<String>,
    source: Option<String>,
    cmd: Option<String>,
    args: Vec<String>,
    meta: Map<String, Value>,
    from_bot: bool,
    source_bot: Weak<BotIdentity>,
}

impl Event {
    fn empty(event_type: EventType) -> Self {
        Self {
            event_type,
            scope: Scope::Public,
            room: None,
            source: None,
            cmd: None,
            args: Vec::new(),
            meta: Map::new(),
            from_bot: false,
            source_bot: Weak::new(),
        }
    }

    /// Builds an event from a raw backend mapping.
    pub fn from_raw(raw: RawEvent, bot: &Arc<BotIdentity>) -> EventResult<Self> {
        let type_name = raw
            .event_type
            .filter(|t| !t.trim().is_empty())
            .ok_or(EventError::MissingType)?;
        let scope = match raw.scope.as_deref() {
            Some(s) => s.parse()?,
            None => Scope::Public,
        };

        let body = match raw.meta.get("body") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(EventError::InvalidBody),
        };

        let mut event = Self::empty(EventType::from(type_name.as_str()));
        event.scope = scope;
        event.room = raw.room;
        event.source = raw.source;
        event.meta = raw.meta;
        event.from_bot = raw.from_bot;
        event.source_bot = Arc::downgrade(bot);

        let token = bot.command_token();
        match event.event_type {
            EventType::Message => {
                if let Some(text) = body.as_deref().and_then(|b| strip_token(b, token))
                    && let Some((cmd, args)) = split_command(text)
                {
                    trace!(cmd = %cmd, "Promoting message to command event");
                    event.event_type = EventType::Cmd;
                    event.cmd = Some(cmd);
                    event.args = args;
                }
            }
            EventType::Cmd => {
                let explicit = event
                    .meta
                    .get("cmd")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let text = body.as_deref().map(|b| strip_token(b, token).unwrap_or(b));
                let (cmd, args) = match (explicit, text.and_then(split_command)) {
                    (Some(cmd), Some((first, rest))) if first == cmd => (cmd, rest),
                    (Some(cmd), _) => (cmd, Vec::new()),
                    (None, Some(parsed)) => parsed,
                    (None, None) => return Err(EventError::EmptyCommand),
                };
                if cmd.is_empty() {
                    return Err(EventError::EmptyCommand);
                }
                event.cmd = Some(cmd);
                event.args = args;
            }
            EventType::Custom(_) => {}
        }

        Ok(event)
    }

    /// Deserializes a [`RawEvent`] from `value` and builds the event.
    pub fn from_value(value: Value, bot: &Arc<BotIdentity>) -> EventResult<Self> {
        let raw: RawEvent = serde_json::from_value(value)?;
        Self::from_raw(raw, bot)
    }

    /// Creates a message event with the given body.
    pub fn message(body: impl Into<String>) -> Self {
        let mut event = Self::empty(EventType::Message);
        event.meta.insert("body".into(), Value::String(body.into()));
        event.meta.insert("recipients".into(), Value::Array(Vec::new()));
        event
    }

    /// Creates a command event.
    pub fn command<I, S>(cmd: impl Into<String>, args: I) -> EventResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd = cmd.into();
        if cmd.trim().is_empty() {
            return Err(EventError::EmptyCommand);
        }
        let mut event = Self::empty(EventType::Cmd);
        event.args = args.into_iter().map(Into::into).collect();
        let mut body = cmd.clone();
        for arg in &event.args {
            body.push(' ');
            body.push_str(arg);
        }
        event.meta.insert("body".into(), Value::String(body));
        event.cmd = Some(cmd);
        Ok(event)
    }

    /// Creates an event of a protocol-defined type.
    pub fn custom(event_type: impl Into<String>) -> Self {
        Self::empty(EventType::Custom(event_type.into()))
    }

    /// Sets the room (builder pattern).
    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Sets the scope (builder pattern).
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Marks the event as produced by the bot itself (builder pattern).
    pub fn with_from_bot(mut self, from_bot: bool) -> Self {
        self.from_bot = from_bot;
        self
    }

    /// Inserts a metadata entry (builder pattern).
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Attaches the owning bot (builder pattern).
    pub fn with_source_bot(mut self, bot: &Arc<BotIdentity>) -> Self {
        self.source_bot = Arc::downgrade(bot);
        self
    }

    /// Returns a copy of this event with its command replaced.
    ///
    /// The body is rewritten to `<token><cmd> <args...>` so handlers that look
    /// at the raw text see the new command as well.
    pub fn with_cmd(&self, cmd: impl Into<String>) -> EventResult<Self> {
        let cmd = cmd.into();
        if cmd.trim().is_empty() {
            return Err(EventError::EmptyCommand);
        }
        let token = self
            .source_bot()
            .map(|b| b.command_token().to_string())
            .unwrap_or_default();

        let mut body = format!("{token}{cmd}");
        for arg in &self.args {
            body.push(' ');
            body.push_str(arg);
        }

        let mut event = self.clone();
        event.event_type = EventType::Cmd;
        event.meta.insert("body".into(), Value::String(body));
        event.cmd = Some(cmd);
        Ok(event)
    }

    /// Re-checks the construction invariants.
    pub fn validate(&self) -> EventResult<()> {
        match &self.event_type {
            EventType::Custom(name) if name.trim().is_empty() => Err(EventError::MissingType),
            EventType::Cmd if self.cmd.as_deref().is_none_or(|c| c.is_empty()) => {
                Err(EventError::EmptyCommand)
            }
            _ => Ok(()),
        }
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn cmd(&self) -> Option<&str> {
        self.cmd.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// The message text, if `meta.body` is a string.
    pub fn body(&self) -> Option<&str> {
        self.meta.get("body").and_then(Value::as_str)
    }

    /// The sender's nick, if known.
    pub fn nick(&self) -> Option<&str> {
        self.meta.get("nick").and_then(Value::as_str)
    }

    /// Names the message was addressed to.
    pub fn recipients(&self) -> Vec<&str> {
        self.meta
            .get("recipients")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn from_bot(&self) -> bool {
        self.from_bot
    }

    /// The bot this event belongs to, if it is still alive.
    pub fn source_bot(&self) -> Option<Arc<BotIdentity>> {
        self.source_bot.upgrade()
    }
}

fn strip_token<'a>(body: &'a str, token: &str) -> Option<&'a str> {
    if token.is_empty() {
        return None;
    }
    body.trim_start().strip_prefix(token)
}

fn split_command(text: &str) -> Option<(String, Vec<String>)> {
    let mut words = text.split_whitespace();
    let cmd = words.next()?.to_string();
    Some((cmd, words.map(str::to_string).collect()))
}

/// Joins `args` with spaces, splits the result on `by` and trims each part.
///
/// ```rust,ignore
/// let args = ["add", "milk", "-", "buy", "eggs"].map(String::from);
/// assert_eq!(split_args_by(&args, "-"), ["add milk", "buy eggs"]);
/// ```
pub fn split_args_by(args: &[String], by: &str) -> Vec<String> {
    args.join(" ")
        .split(by)
        .map(|part| part.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bot() -> Arc<BotIdentity> {
        Arc::new(BotIdentity::new("ember"))
    }

    #[test]
    fn test_message_is_promoted_to_command() {
        let bot = bot();
        let event = Event::from_value(
            json!({
                "type": "message",
                "source": "room",
                "meta": { "body": "!test one two", "recipients": [] }
            }),
            &bot,
        )
        .unwrap();

        assert_eq!(event.event_type(), &EventType::Cmd);
        assert_eq!(event.cmd(), Some("test"));
        assert_eq!(event.args(), ["one", "two"]);
        assert_eq!(event.body(), Some("!test one two"));
        assert_eq!(event.source_bot().unwrap().nick(), "ember");
    }

    #[test]
    fn test_plain_message_stays_message() {
        let bot = bot();
        let event = Event::from_value(
            json!({
                "event_type": "message",
                "scope": "private",
                "meta": { "body": "hello world", "nick": "alice" }
            }),
            &bot,
        )
        .unwrap();

        assert_eq!(event.event_type(), &EventType::Message);
        assert_eq!(event.scope(), Scope::Private);
        assert_eq!(event.cmd(), None);
        assert_eq!(event.nick(), Some("alice"));
    }

    #[test]
    fn test_lone_token_is_not_a_command() {
        let bot = bot();
        let event = Event::from_value(json!({ "type": "message", "meta": { "body": "!" } }), &bot)
            .unwrap();
        assert_eq!(event.event_type(), &EventType::Message);
    }

    #[test]
    fn test_invalid_payloads_are_rejected() {
        let bot = bot();
        assert!(matches!(
            Event::from_value(json!({ "meta": {} }), &bot),
            Err(EventError::MissingType)
        ));
        assert!(matches!(
            Event::from_value(json!({ "type": "message", "scope": "everywhere" }), &bot),
            Err(EventError::InvalidScope(_))
        ));
        assert!(matches!(
            Event::from_value(json!({ "type": "message", "meta": { "body": 3 } }), &bot),
            Err(EventError::InvalidBody)
        ));
        assert!(matches!(
            Event::from_value(json!({ "type": "cmd", "meta": {} }), &bot),
            Err(EventError::EmptyCommand)
        ));
        assert!(matches!(
            Event::from_value(json!("not a mapping"), &bot),
            Err(EventError::Malformed(_))
        ));
    }

    #[test]
    fn test_explicit_cmd_event() {
        let bot = bot();
        let event = Event::from_value(
            json!({ "type": "cmd", "meta": { "body": "!echo a b" } }),
            &bot,
        )
        .unwrap();
        assert_eq!(event.cmd(), Some("echo"));
        assert_eq!(event.args(), ["a", "b"]);
    }

    #[test]
    fn test_with_cmd_rewrites_body() {
        let bot = bot();
        let event = Event::from_value(
            json!({ "type": "message", "meta": { "body": "!test", "recipients": [] } }),
            &bot,
        )
        .unwrap();

        let changed = event.with_cmd("result").unwrap();
        assert_eq!(changed.cmd(), Some("result"));
        assert_eq!(changed.body(), Some("!result"));
        assert!(event.with_cmd(" ").is_err());
    }

    #[test]
    fn test_command_constructor_keeps_invariant() {
        assert!(Event::command("", Vec::<String>::new()).is_err());
        let event = Event::command("ping", ["x"]).unwrap();
        assert!(event.validate().is_ok());
        assert_eq!(event.body(), Some("ping x"));
    }

    #[test]
    fn test_source_bot_is_weak() {
        let bot = bot();
        let event = Event::message("hi").with_source_bot(&bot);
        assert!(event.source_bot().is_some());
        drop(bot);
        assert!(event.source_bot().is_none());
    }

    #[test]
    fn test_split_args_by() {
        let args: Vec<String> = ["test", "-", "something", "-", "else"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(split_args_by(&args, "-"), ["test", "something", "else"]);
    }
}
