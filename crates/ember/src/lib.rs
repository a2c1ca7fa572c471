//! # Ember
//!
//! An event-dispatch bot framework: protocol backends turn network traffic
//! into [`Event`](prelude::Event)s, plugins react to them through handlers
//! and scheduled tasks, and replies flow back as [`Action`](prelude::Action)s.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐  Event   ┌───────────────┐  HandlerCall  ┌──────────────────┐
//! │ Backend │────────▶│ PluginManager │─────────────▶│ handlers / tasks │
//! │         │◀────────│  (per bot)    │◀─────────────│ (inline or pool) │
//! └─────────┘  Action  └───────────────┘     Reply     └──────────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, sets up logging, builds one bot per
//!   configured nick and routes its actions to the bot's backend
//! - **Plugin manager**: matches events against registered parsers and turns
//!   handler replies into actions
//! - **Plugins**: modules of handlers plus instances with their own task
//!   scheduler and key-value storage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ember::prelude::*;
//!
//! fn roll(call: HandlerCall) -> String {
//!     format!("you rolled {}", call.args().join(" "))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let mut registry = PluginRegistry::with_builtins();
//!     registry.insert(PluginModule::new("dice").with_handler(Parser::cmd("roll", roll).doc("Rolls dice.")));
//!
//!     let mut runtime = EmberRuntime::builder().registry(registry).build()?;
//!     runtime.attach_backend("ember", Arc::new(MyBackend::new()))?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `builtin` *(default)*: the `basic` module with the `help` command
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use ember_core as core;
pub use ember_framework as framework;
pub use ember_runtime as runtime;

/// Commonly used types for building bots and plugins.
///
/// ```rust,ignore
/// use ember::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;
    pub use std::time::Duration;

    // Runtime - main entry point
    pub use ember_runtime::{Bot, BotConfig, EmberConfig, EmberRuntime, RuntimeError};

    // Event model
    pub use ember_core::{
        Action, ActionBuilder, Backend, BackendError, BackendResult, BotIdentity, Event,
        EventType, Scope, split_args_by,
    };

    // Handlers and plugins
    pub use ember_framework::{
        BotPlugin, BoxError, HandlerCall, IntoReply, Parser, ParserBuilder, PluginContext,
        PluginModule, PluginRegistry, PluginRuntime, Reply, Store, TaskHandle,
    };

    // Backends implement `Backend` with this attribute
    pub use ember_core::async_trait;
}
