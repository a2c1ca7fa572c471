//! Explicit plugin registry.
//!
//! A [`PluginRegistry`] is an ordered list of [`PluginModule`]s, populated in
//! code at startup. Nothing is discovered at runtime: a module is available
//! to a bot only if it was inserted here, and active only if the bot's
//! `enabled_plugins` list (when present) names it.
//!
//! ```rust,ignore
//! let mut registry = PluginRegistry::with_builtins();
//! registry.insert(
//!     PluginModule::new("dice")
//!         .with_handler(Parser::cmd("roll", roll).doc("Rolls a die.")),
//! );
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::parser::ParserBuilder;
use crate::plugin::{BotPlugin, PluginContext};

/// Constructs one plugin instance.
pub type PluginFactory =
    Arc<dyn Fn(PluginContext) -> Result<Arc<dyn BotPlugin>, BoxError> + Send + Sync>;

/// A named bundle of bare handlers and plugin constructors.
#[derive(Clone)]
pub struct PluginModule {
    name: String,
    handlers: Vec<ParserBuilder>,
    plugins: Vec<(String, PluginFactory)>,
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("name", &self.name)
            .field("handlers", &self.handlers.len())
            .field(
                "plugins",
                &self.plugins.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PluginModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Vec::new(),
            plugins: Vec::new(),
        }
    }

    /// Adds a bare handler.
    pub fn with_handler(mut self, handler: ParserBuilder) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Adds a plugin constructor.
    pub fn with_plugin<F, P>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PluginContext) -> Result<Arc<P>, BoxError> + Send + Sync + 'static,
        P: BotPlugin,
    {
        let factory: PluginFactory =
            Arc::new(move |ctx| factory(ctx).map(|p| p as Arc<dyn BotPlugin>));
        self.plugins.push((name.into(), factory));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handlers(&self) -> &[ParserBuilder] {
        &self.handlers
    }

    pub fn plugins(&self) -> impl Iterator<Item = (&str, &PluginFactory)> {
        self.plugins.iter().map(|(name, f)| (name.as_str(), f))
    }
}

/// Ordered collection of installed modules.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    modules: Vec<PluginModule>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in modules.
    #[cfg(feature = "builtin")]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for module in crate::plugin::builtin::modules() {
            registry.insert(module);
        }
        registry
    }

    /// Adds `module`, replacing an installed module of the same name in place.
    pub fn insert(&mut self, module: PluginModule) {
        match self.modules.iter_mut().find(|m| m.name == module.name) {
            Some(existing) => *existing = module,
            None => self.modules.push(module),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PluginModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginModule> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerCall;
    use crate::parser::Parser;

    struct Nop;
    impl BotPlugin for Nop {}

    #[test]
    fn test_insert_keeps_order_and_replaces_by_name() {
        let mut registry = PluginRegistry::new();
        registry.insert(PluginModule::new("a"));
        registry.insert(PluginModule::new("b"));
        registry.insert(
            PluginModule::new("a").with_handler(Parser::cmd("x", |_call: HandlerCall| ())),
        );

        assert_eq!(registry.names(), ["a", "b"]);
        assert_eq!(registry.get("a").unwrap().handlers().len(), 1);
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_module_collects_plugins() {
        let module = PluginModule::new("m")
            .with_plugin("nop", |_ctx: PluginContext| Ok(Arc::new(Nop)))
            .with_plugin("nop2", |_ctx: PluginContext| Ok(Arc::new(Nop)));
        let names: Vec<&str> = module.plugins().map(|(n, _)| n).collect();
        assert_eq!(names, ["nop", "nop2"]);
    }

    #[cfg(feature = "builtin")]
    #[test]
    fn test_builtins_are_installed() {
        assert!(PluginRegistry::with_builtins().get("basic").is_some());
    }
}
