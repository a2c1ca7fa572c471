//! Handler return values and their conversion into actions.
//!
//! Handlers may return anything implementing [`IntoReply`]: nothing, text, a
//! ready-made [`Action`], a JSON value, or an `Option`/`Result` of those.
//! [`build_action`] turns the resulting [`Reply`] into an outbound action; the
//! dispatch engine and the task scheduler both go through it.

use std::sync::Arc;

use ember_core::{Action, ActionError, ActionResult, BotIdentity, Event};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::BoxError;

/// The raw result of one handler or task invocation.
#[derive(Debug, Clone, Default)]
pub enum Reply {
    /// Nothing to send.
    #[default]
    Empty,
    /// Message text.
    Text(String),
    /// A fully built action, forwarded unchanged.
    Action(Action),
    /// An arbitrary value, coerced to text.
    Value(Value),
}

/// Conversion of handler return values into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, BoxError>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(self)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(Reply::Empty)
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(Reply::Text(self))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(Reply::Text(self.to_string()))
    }
}

impl IntoReply for Action {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(Reply::Action(self))
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(Reply::Value(self))
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Reply, BoxError> {
        match self {
            Some(value) => value.into_reply(),
            None => Ok(Reply::Empty),
        }
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<BoxError>,
{
    fn into_reply(self) -> Result<Reply, BoxError> {
        self.map_err(Into::into)?.into_reply()
    }
}

fn coerce(value: Value) -> ActionResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => serde_json::to_string(&other)
            .map(Some)
            .map_err(|e| ActionError::Coercion(e.to_string())),
    }
}

/// Builds a message action with an explicit or derived destination.
///
/// - `room` given: sent there, keeping the event's scope if any.
/// - otherwise, with an event: a reply to that event.
/// - otherwise: sent to the bot's default rooms.
pub fn build_message(
    body: impl Into<String>,
    room: Option<&str>,
    event: Option<&Arc<Event>>,
    identity: &BotIdentity,
) -> ActionResult<Action> {
    match (room, event) {
        (None, Some(event)) => Action::reply(event, body),
        (room, event) => {
            let mut builder = Action::message(body);
            if let Some(event) = event {
                builder = builder.scope(event.scope()).source_event(event);
            }
            match room {
                Some(room) => builder.to_room(room),
                None => builder.to_rooms(identity.default_rooms()),
            }
            .build()
        }
    }
}

/// Converts a reply into an action, or `None` when there is nothing to send.
///
/// Coercion and construction failures are logged and yield `None`.
pub fn build_action(
    reply: Reply,
    event: Option<&Arc<Event>>,
    identity: &BotIdentity,
) -> Option<Action> {
    let body = match reply {
        Reply::Empty => return None,
        Reply::Action(action) => return Some(action),
        Reply::Text(text) => text,
        Reply::Value(value) => match coerce(value) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to convert reply to message text");
                return None;
            }
        },
    };

    match build_message(body, None, event, identity) {
        Ok(action) => {
            debug!(rooms = ?action.destination_rooms(), "Built action from reply");
            Some(action)
        }
        Err(e) => {
            warn!(error = %e, "Failed to build action from reply");
            None
        }
    }
}
