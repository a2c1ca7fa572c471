//! Outbound actions requested by handlers.
//!
//! Actions are built once through [`ActionBuilder`] and never mutated
//! afterwards; backends consume them by value.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ActionError, ActionResult};
use crate::event::{Event, Scope};

/// The kind of outbound effect.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Send a text message.
    #[default]
    Message,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => f.write_str("message"),
        }
    }
}

/// One outbound effect, destined for a protocol backend.
#[derive(Debug, Clone)]
pub struct Action {
    action_type: ActionType,
    scope: Scope,
    meta: Map<String, Value>,
    destination_rooms: Vec<String>,
    source_event: Weak<Event>,
}

impl Action {
    /// Starts building a message action with the given body.
    pub fn message(body: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(ActionType::Message).body(body)
    }

    /// Builds a message replying to `event`.
    ///
    /// The reply keeps the event's scope and goes to the event's room. A
    /// private event without a room is answered to the sender's nick.
    pub fn reply(event: &Arc<Event>, body: impl Into<String>) -> ActionResult<Self> {
        let mut builder = Self::message(body)
            .scope(event.scope())
            .source_event(event);
        if let Some(room) = event.room() {
            builder = builder.to_room(room);
        } else if event.scope() == Scope::Private
            && let Some(nick) = event.nick()
        {
            builder = builder.to_room(nick);
        }
        builder.build()
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// The text payload (`meta.body`).
    pub fn body(&self) -> Option<&str> {
        self.meta.get("body").and_then(Value::as_str)
    }

    pub fn destination_rooms(&self) -> &[String] {
        &self.destination_rooms
    }

    /// Returns `false` for actions that must be dropped instead of sent.
    pub fn has_destination(&self) -> bool {
        !self.destination_rooms.is_empty()
    }

    /// The event that triggered this action, if it is still alive.
    pub fn source_event(&self) -> Option<Arc<Event>> {
        self.source_event.upgrade()
    }
}

/// Builder for [`Action`].
#[derive(Debug, Clone)]
pub struct ActionBuilder {
    action_type: ActionType,
    scope: Scope,
    meta: Map<String, Value>,
    destination_rooms: Vec<String>,
    source_event: Weak<Event>,
}

impl ActionBuilder {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            scope: Scope::Public,
            meta: Map::new(),
            destination_rooms: Vec::new(),
            source_event: Weak::new(),
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.meta.insert("body".into(), Value::String(body.into()));
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn to_room(mut self, room: impl Into<String>) -> Self {
        self.destination_rooms.push(room.into());
        self
    }

    pub fn to_rooms<I, S>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destination_rooms.extend(rooms.into_iter().map(Into::into));
        self
    }

    pub fn source_event(mut self, event: &Arc<Event>) -> Self {
        self.source_event = Arc::downgrade(event);
        self
    }

    /// Finishes the action. Message actions require a non-empty body.
    pub fn build(self) -> ActionResult<Action> {
        if self.action_type == ActionType::Message {
            match self.meta.get("body") {
                Some(Value::String(body)) if !body.is_empty() => {}
                _ => return Err(ActionError::EmptyBody),
            }
        }
        Ok(Action {
            action_type: self.action_type,
            scope: self.scope,
            meta: self.meta,
            destination_rooms: self.destination_rooms,
            source_event: self.source_event,
        })
    }
}
