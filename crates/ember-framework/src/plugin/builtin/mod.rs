//! Built-in plugins shipped with the Ember framework.
//!
//! These modules are enabled by the `builtin` feature flag (on by default).
//!
//! | Module | Commands | Description |
//! |--------|----------|-------------|
//! | `basic` | `help` | Lists commands and shows their documentation |
//!
//! # Loading built-in plugins
//!
//! ```rust,ignore
//! let registry = PluginRegistry::with_builtins();
//! ```

pub mod help;

use crate::plugin::PluginModule;

/// All built-in modules.
pub fn modules() -> Vec<PluginModule> {
    vec![help::module()]
}
