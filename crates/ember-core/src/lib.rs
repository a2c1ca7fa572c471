//! # Ember Core
//!
//! The data model of the Ember bot framework.
//!
//! This crate defines the values that travel between protocol backends and
//! the dispatch engine in `ember-framework`:
//!
//! - **Events** ([`Event`], [`RawEvent`]): normalized inbound occurrences.
//! - **Actions** ([`Action`], [`ActionBuilder`]): outbound effects requested
//!   by handlers.
//! - **Bots** ([`BotIdentity`], [`Backend`]): who a bot is and how its
//!   actions reach the network.
//!
//! ```text
//! ┌─────────────┐  Event   ┌───────────────┐  Action  ┌─────────────┐
//! │   Backend   │─────────▶│ PluginManager │─────────▶│   Backend   │
//! │  (inbound)  │          │  (framework)  │          │ (outbound)  │
//! └─────────────┘          └───────────────┘          └─────────────┘
//! ```
//!
//! No protocol wire format is defined here; backends translate to and from
//! these types.

pub mod action;
pub mod bot;
pub mod error;
pub mod event;

pub use action::{Action, ActionBuilder, ActionType};
pub use bot::{Backend, BotIdentity, BoxedBackend};
pub use error::{
    ActionError, ActionResult, BackendError, BackendResult, EventError, EventResult,
};
pub use event::{Event, EventType, RawEvent, Scope, split_args_by};

// Backend implementations need the same attribute as the trait
pub use async_trait::async_trait;
