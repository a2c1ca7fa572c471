//! Handler registry and event dispatch.
//!
//! [`PluginManager`] is the per-bot dispatch engine. It:
//!
//! - Keeps the registry of [`Parser`]s grouped by event type, in
//!   registration order. The `None` bucket holds parsers that see every
//!   event.
//! - Instantiates the enabled [`PluginModule`]s of a [`PluginRegistry`] and
//!   owns their [`PluginRuntime`]s.
//! - On each event, invokes every matching parser (inline ones right away,
//!   threaded ones on the [`WorkerPool`]) and turns each reply into an
//!   [`Action`] on the bot's action queue.
//!
//! Registration takes `&mut self` and dispatch takes `&self`, so the
//! registry cannot change while an event is being dispatched.
//!
//! # Example
//!
//! ```rust,ignore
//! let identity = Arc::new(BotIdentity::new("ember"));
//! let (mut manager, mut actions) = PluginManager::with_channel(identity.clone(), ManagerConfig::default());
//! manager.start(&PluginRegistry::with_builtins(), None, &Map::new());
//!
//! let event = Arc::new(Event::from_value(raw, &identity)?);
//! for pending in manager.process_event(event)? {
//!     pending.wait().await;
//! }
//! while let Ok(action) = actions.try_recv() {
//!     backend.handle_action(action).await?;
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ember_core::{Action, BotIdentity, Event, EventType};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, info, warn};

use crate::error::{DispatchError, DispatchResult, RegistrationError, RegistrationResult};
use crate::executor::{DEFAULT_POOL_SIZE, WorkerPool, ready};
use crate::handler::{CommandDocs, HandlerCall, invoke};
use crate::parser::{Parser, ParserBuilder};
use crate::plugin::{
    BotPlugin, PluginContext, PluginModule, PluginRegistry, PluginRuntime, StorageConfig,
};
use crate::reply::build_action;

/// Settings shared by every plugin of one manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum number of concurrently running threaded handlers.
    pub worker_threads: usize,
    pub storage: StorageConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_POOL_SIZE,
            storage: StorageConfig::default(),
        }
    }
}

/// The eventual outcome of one handler invocation.
///
/// The action, if any, has already been put on the action queue by the time
/// [`wait`](Self::wait) returns it.
#[derive(Debug)]
pub struct PendingResult {
    label: String,
    handle: JoinHandle<Option<Action>>,
}

impl PendingResult {
    /// Diagnostic label of the invoked parser.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the handler and returns the action it produced.
    pub async fn wait(self) -> Option<Action> {
        self.handle.await.ok().flatten()
    }
}

// =============================================================================
// PluginInstance (internal)
// =============================================================================

struct PluginInstance {
    module: String,
    runtime: Arc<PluginRuntime>,
    _plugin: Arc<dyn BotPlugin>,
}

// =============================================================================
// PluginManager
// =============================================================================

/// Per-bot registry and dispatch engine.
pub struct PluginManager {
    identity: Arc<BotIdentity>,
    config: ManagerConfig,
    registry: HashMap<Option<EventType>, Vec<Arc<Parser>>>,
    docs: Arc<CommandDocs>,
    plugins: Vec<PluginInstance>,
    pool: Arc<WorkerPool>,
    outbox: mpsc::UnboundedSender<Action>,
}

impl PluginManager {
    /// Creates an empty manager sending its actions to `outbox`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        identity: Arc<BotIdentity>,
        config: ManagerConfig,
        outbox: mpsc::UnboundedSender<Action>,
    ) -> Self {
        let pool = WorkerPool::new(config.worker_threads);
        Self {
            identity,
            config,
            registry: HashMap::new(),
            docs: Arc::new(CommandDocs::new()),
            plugins: Vec::new(),
            pool,
            outbox,
        }
    }

    /// Creates a manager together with the receiving end of its action queue.
    pub fn with_channel(
        identity: Arc<BotIdentity>,
        config: ManagerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(identity, config, tx), rx)
    }

    pub fn identity(&self) -> &Arc<BotIdentity> {
        &self.identity
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Appends `parser` to its event type's bucket.
    pub fn register(&mut self, parser: Parser) {
        if let Some(command) = parser.command() {
            Arc::make_mut(&mut self.docs).insert(command.to_string(), parser.doc_summary());
        }
        debug!(
            parser = %parser.label(),
            event_type = ?parser.event_type(),
            threaded = parser.threaded(),
            "Registered parser"
        );
        self.registry
            .entry(parser.event_type().cloned())
            .or_default()
            .push(Arc::new(parser));
    }

    /// Builds and registers a parser; a failed build is logged and skipped.
    pub fn register_builder(&mut self, builder: ParserBuilder) -> RegistrationResult<()> {
        match builder.build() {
            Ok(parser) => {
                self.register(parser);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Parser rejected");
                Err(e)
            }
        }
    }

    /// Registers every enabled module of `registry`.
    ///
    /// `enabled` limits loading to the named modules; `None` loads all of
    /// them. Plugin instances receive their section of `configs`, are
    /// enabled and then set up. Failures are logged, returned, and skip only the
    /// offending parser or instance.
    pub fn start(
        &mut self,
        registry: &PluginRegistry,
        enabled: Option<&[String]>,
        configs: &Map<String, Value>,
    ) -> Vec<RegistrationError> {
        let mut failures = Vec::new();
        for module in registry.iter() {
            if let Some(enabled) = enabled
                && !enabled.iter().any(|name| name == module.name())
            {
                debug!(module = %module.name(), "Module not enabled, skipping");
                continue;
            }
            failures.extend(self.load_module(module, configs));
        }
        info!(
            bot = %self.identity.nick(),
            parsers = self.registry.values().map(Vec::len).sum::<usize>(),
            plugins = self.plugins.len(),
            "Plugins loaded"
        );
        failures
    }

    fn load_module(
        &mut self,
        module: &PluginModule,
        configs: &Map<String, Value>,
    ) -> Vec<RegistrationError> {
        let mut failures = Vec::new();

        for builder in module.handlers() {
            if let Err(e) = self.register_builder(builder.clone().default_source(module.name())) {
                failures.push(e);
            }
        }

        for (name, factory) in module.plugins() {
            let label = format!("{}.{}", module.name(), name);
            let config = configs
                .get(name)
                .or_else(|| configs.get(module.name()))
                .cloned()
                .unwrap_or(Value::Null);
            let runtime = PluginRuntime::new(
                label.clone(),
                self.identity.clone(),
                config,
                self.config.storage.clone(),
                self.outbox.clone(),
                self.pool.clone(),
            );

            let plugin = match factory(PluginContext::new(runtime.clone())) {
                Ok(plugin) => plugin,
                Err(e) => {
                    let e = RegistrationError::PluginConstruction {
                        plugin: label,
                        reason: e.to_string(),
                    };
                    error!(error = %e, "Plugin discarded");
                    failures.push(e);
                    continue;
                }
            };
            runtime.enable();
            if let Err(e) = plugin.setup() {
                let e = RegistrationError::PluginSetup {
                    plugin: label,
                    reason: e.to_string(),
                };
                error!(error = %e, "Plugin discarded");
                runtime.disable();
                runtime.close_storages();
                failures.push(e);
                continue;
            }

            for builder in plugin.clone().handlers() {
                if let Err(e) = self.register_builder(builder.default_source(&label)) {
                    failures.push(e);
                }
            }
            self.plugins.push(PluginInstance {
                module: module.name().to_string(),
                runtime,
                _plugin: plugin,
            });
        }

        failures
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// Command name → first doc line, sorted by command.
    pub fn command_docs(&self) -> Arc<CommandDocs> {
        self.docs.clone()
    }

    /// The parsers registered under `event_type`, in registration order.
    pub fn parsers(&self, event_type: Option<&EventType>) -> &[Arc<Parser>] {
        self.registry
            .get(&event_type.cloned())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The runtime of the plugin instance labelled `module.name`.
    pub fn plugin_runtime(&self, label: &str) -> Option<&Arc<PluginRuntime>> {
        self.plugins
            .iter()
            .map(|p| &p.runtime)
            .find(|r| r.name() == label)
    }

    /// Runtimes of all live plugin instances, in load order.
    pub fn plugin_runtimes(&self) -> impl Iterator<Item = &Arc<PluginRuntime>> {
        self.plugins.iter().map(|p| &p.runtime)
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Dispatches `event` to every matching parser.
    ///
    /// Returns immediately with one [`PendingResult`] per invoked handler.
    /// Only an invalid event is an error; handler failures resolve to no
    /// action.
    pub fn process_event(&self, event: Arc<Event>) -> DispatchResult<Vec<PendingResult>> {
        let span = debug_span!(
            "dispatch",
            bot = %self.identity.nick(),
            event_type = %event.event_type()
        );
        let _enter = span.enter();

        if let Err(e) = event.validate() {
            warn!(error = %e, "Rejecting invalid event");
            return Err(DispatchError::InvalidEvent(e));
        }

        let typed = self.parsers(Some(event.event_type()));
        let always = self.parsers(None);

        let mut pending = Vec::new();
        for parser in typed.iter().chain(always) {
            let Some(matched) = parser.matches(&event) else {
                continue;
            };
            if event.from_bot() && !parser.parse_bot_events() {
                info!(parser = %parser.label(), "Ignoring event from the bot itself");
                continue;
            }
            pending.push(self.spawn_handler(parser, &event, matched.into_groups()));
        }

        debug!(invoked = pending.len(), "Event dispatched");
        Ok(pending)
    }

    /// Parses a raw backend payload and dispatches it.
    pub fn process_raw(&self, raw: Value) -> DispatchResult<Vec<PendingResult>> {
        let event = Event::from_value(raw, &self.identity).map_err(|e| {
            warn!(error = %e, "Rejecting malformed event");
            DispatchError::InvalidEvent(e)
        })?;
        self.process_event(Arc::new(event))
    }

    fn spawn_handler(
        &self,
        parser: &Parser,
        event: &Arc<Event>,
        groups: Vec<Option<String>>,
    ) -> PendingResult {
        let label = parser.label();
        let call = HandlerCall {
            event: event.clone(),
            groups,
            docs: self.docs.clone(),
        };

        let reply = if parser.threaded() {
            let f = parser.func().clone();
            self.pool.submit(label.clone(), move || f(call))
        } else {
            ready(invoke(&label, || (parser.func())(call)))
        };

        let event = event.clone();
        let identity = self.identity.clone();
        let outbox = self.outbox.clone();
        let handle = tokio::spawn(async move {
            let action = build_action(reply.await?, Some(&event), &identity)?;
            if outbox.send(action.clone()).is_err() {
                warn!("Action queue closed, dropping action");
            }
            Some(action)
        });

        PendingResult { label, handle }
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Disables every plugin instance and closes its storages.
    pub fn shutdown(&self) {
        for instance in &self.plugins {
            debug!(module = %instance.module, plugin = %instance.runtime.name(), "Stopping plugin");
            instance.runtime.disable();
            instance.runtime.close_storages();
        }
    }
}
