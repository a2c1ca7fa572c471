//! # Ember Framework
//!
//! The dispatch engine of the Ember bot framework.
//!
//! This layer provides:
//! - [`Parser`]: a handler together with its match criteria and execution
//!   policy, built explicitly with [`ParserBuilder`]
//! - [`PluginManager`]: the per-bot registry that matches events, runs
//!   handlers inline or on the [`WorkerPool`] and turns replies into actions
//! - [`plugin`]: plugin instances with their own task scheduler, persistent
//!   storage and self-initiated messages
//!
//! The framework consumes [`ember_core::Event`]s and produces
//! [`ember_core::Action`]s; it knows nothing about any chat protocol.

pub mod error;
pub mod executor;
pub mod handler;
pub mod manager;
pub mod parser;
pub mod plugin;
pub mod reply;

pub use error::{
    BoxError, DispatchError, DispatchResult, HandlerError, RegistrationError, RegistrationResult,
    StorageError, StorageResult,
};
pub use executor::{PendingReply, WorkerPool};
pub use handler::{CommandDocs, HandlerCall, HandlerFn, TaskFn, handler_fn, task_fn};
pub use manager::{ManagerConfig, PendingResult, PluginManager};
pub use parser::{MatchResult, Parser, ParserBuilder, Trigger};
pub use plugin::{
    BotPlugin, PluginContext, PluginModule, PluginRegistry, PluginRuntime, StorageConfig, Store,
    TaskHandle,
};
pub use reply::{IntoReply, Reply, build_action, build_message};
