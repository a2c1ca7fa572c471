//! Plugin system for the Ember framework.
//!
//! # Architecture
//!
//! Plugins come in two shapes, both shipped inside a [`PluginModule`]:
//!
//! - **Bare handlers**: [`ParserBuilder`]s registered as they are.
//! - **Plugin instances**: types implementing [`BotPlugin`], constructed once
//!   per bot from a [`PluginContext`]. Each instance owns a
//!   [`PluginRuntime`] with its own task lists and storages.
//!
//! Modules are collected in a [`PluginRegistry`]; the
//! [`PluginManager`](crate::PluginManager) instantiates the enabled ones.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use ember::prelude::*;
//!
//! struct Counter {
//!     runtime: Arc<PluginRuntime>,
//! }
//!
//! impl BotPlugin for Counter {
//!     fn setup(&self) -> Result<(), BoxError> {
//!         self.runtime.open_storage("counts")?;
//!         Ok(())
//!     }
//!
//!     fn handlers(self: Arc<Self>) -> Vec<ParserBuilder> {
//!         let store = self.runtime.clone();
//!         vec![Parser::cmd("count", move |_call: HandlerCall| -> Result<String, BoxError> {
//!             let counts = store.open_storage("counts")?;
//!             let n: u64 = counts.get("n")?.unwrap_or(0) + 1;
//!             counts.set("n", &n)?;
//!             Ok(format!("{n}"))
//!         })]
//!     }
//! }
//!
//! let module = PluginModule::new("counter")
//!     .with_plugin("counter", |ctx: PluginContext| Ok(Arc::new(Counter { runtime: ctx.runtime() })));
//! ```
//!
//! # Configuration
//!
//! Each instance receives the table found under `plugins.<name>` in its
//! bot's configuration:
//!
//! ```toml
//! [[bots]]
//! nick = "ember"
//!
//! [bots.plugins.counter]
//! start = 10
//! ```

use std::sync::Arc;

use crate::error::BoxError;
use crate::parser::ParserBuilder;

// ─── Submodules ──────────────────────────────────────────────────────────────
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod storage;

#[cfg(feature = "builtin")]
pub mod builtin;

// ─── Re-exports from submodules ──────────────────────────────────────────────
pub use registry::{PluginFactory, PluginModule, PluginRegistry};
pub use runtime::PluginRuntime;
pub use scheduler::{ScheduledTask, TaskHandle, TaskKind, TaskScheduler, TaskState};
pub use storage::{StorageConfig, Store};

/// A plugin instance bound to one bot.
pub trait BotPlugin: Send + Sync + 'static {
    /// Called once after construction. An error discards the instance.
    fn setup(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// The handlers this instance contributes.
    fn handlers(self: Arc<Self>) -> Vec<ParserBuilder> {
        Vec::new()
    }
}

/// Passed to plugin constructors.
#[derive(Debug, Clone)]
pub struct PluginContext {
    runtime: Arc<PluginRuntime>,
}

impl PluginContext {
    pub(crate) fn new(runtime: Arc<PluginRuntime>) -> Self {
        Self { runtime }
    }

    /// The runtime the new instance will run in.
    pub fn runtime(&self) -> Arc<PluginRuntime> {
        self.runtime.clone()
    }

    /// Deserializes the plugin configuration section into `T`.
    pub fn config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.runtime.config()
    }
}
