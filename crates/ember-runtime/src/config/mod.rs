//! Configuration for the Ember runtime.
//!
//! One [`EmberConfig`] is loaded at startup through [`ConfigLoader`] and
//! handed out as values: [`ManagerConfig`](ember_framework::ManagerConfig)
//! for each bot's plugin manager and [`LoggingConfig`] for the subscriber.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, DispatchConfig, EmberConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    StorageSection,
};
pub use validation::validate_config;
