//! Ember Runtime - configuration, logging and orchestration for Ember bots.
//!
//! This crate provides:
//! - [`config`]: figment-based loading of [`EmberConfig`] from TOML/YAML
//!   files and `EMBER_*` environment variables
//! - [`logging`]: `tracing-subscriber` setup driven by the configuration
//! - [`Bot`]: one backend wired to one plugin manager
//! - [`EmberRuntime`]: builds every configured bot and runs them until shutdown
//!
//! ```ignore
//! use std::sync::Arc;
//! use ember_runtime::EmberRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut runtime = EmberRuntime::new();
//!     runtime.attach_backend("ember", Arc::new(ConsoleBackend))?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use bot::Bot;
pub use config::{BotConfig, ConfigError, ConfigLoader, ConfigResult, EmberConfig, LoggingConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{EmberRuntime, RuntimeBuilder};

// Re-export tracing for use by plugin crates
pub use tracing;
