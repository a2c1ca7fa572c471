//! Error types for the Ember core model.
//!
//! Framework-level errors (registration, dispatch, storage) live in
//! `ember-framework`; this module only covers the data model and the
//! backend boundary.

use thiserror::Error;

// =============================================================================
// Event Errors
// =============================================================================

/// Errors raised while turning a raw backend payload into an [`Event`](crate::Event).
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// The payload could not be deserialized at all.
    #[error("malformed event payload: {0}")]
    Malformed(String),

    /// Neither `type` nor `event_type` was present.
    #[error("event has no type")]
    MissingType,

    /// The `scope` field held an unknown value.
    #[error("invalid event scope '{0}'")]
    InvalidScope(String),

    /// A command event carried no command token.
    #[error("command event without a command")]
    EmptyCommand,

    /// `meta.body` was present but not a string.
    #[error("event body must be a string")]
    InvalidBody,
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

// =============================================================================
// Action Errors
// =============================================================================

/// Errors raised while constructing an [`Action`](crate::Action).
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// A message action needs a non-empty body.
    #[error("action body is empty")]
    EmptyBody,

    /// A handler value could not be turned into message text.
    #[error("cannot convert value to message text: {0}")]
    Coercion(String),
}

// =============================================================================
// Backend Errors
// =============================================================================

/// Errors reported by a protocol backend while delivering an action.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend is not connected.
    #[error("backend is not connected")]
    NotConnected,

    /// The backend does not know how to deliver this action type.
    #[error("unsupported action type '{0}'")]
    Unsupported(String),

    /// Delivery failed.
    #[error("failed to deliver action: {0}")]
    SendFailed(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for event construction.
pub type EventResult<T> = Result<T, EventError>;

/// Result type for action construction.
pub type ActionResult<T> = Result<T, ActionError>;

/// Result type for backend delivery.
pub type BackendResult<T> = Result<T, BackendError>;
