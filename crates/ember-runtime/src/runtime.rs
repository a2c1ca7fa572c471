//! Runtime orchestration: one [`Bot`] per configured bot.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ember_runtime::EmberRuntime;
//!
//! let mut runtime = EmberRuntime::builder()
//!     .config_file("ember.toml")
//!     .registry(PluginRegistry::with_builtins())
//!     .build()?;
//!
//! runtime.attach_backend("ember", Arc::new(MyBackend::connect().await?))?;
//! runtime.run().await?;
//! ```
//!
//! Backends feed inbound payloads through [`EmberRuntime::bot`] and
//! [`Bot::process_raw`].

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use ember_core::BoxedBackend;
use ember_framework::PluginRegistry;
use tokio::signal;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bot::Bot;
use crate::config::{ConfigLoader, ConfigResult, EmberConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

struct Running {
    bots: Vec<Arc<Bot>>,
    tasks: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

/// Owns the configuration, the installed plugins and the running bots.
pub struct EmberRuntime {
    config: EmberConfig,
    registry: PluginRegistry,
    backends: HashMap<String, BoxedBackend>,
    running: RwLock<Option<Running>>,
}

impl EmberRuntime {
    /// Loads configuration from the default locations, falling back to
    /// defaults when loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                EmberConfig::default()
            });

        Self::from_config(config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime and initializes logging from `config`.
    pub fn from_config(config: EmberConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            bots = config.bots.len(),
            worker_threads = config.dispatch.worker_threads,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            registry: default_registry(),
            backends: HashMap::new(),
            running: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EmberConfig {
        &self.config
    }

    /// Replaces the installed plugin modules. Takes effect on the next start.
    pub fn set_registry(&mut self, registry: PluginRegistry) {
        self.registry = registry;
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    /// Attaches the backend that delivers actions for the bot `nick`.
    pub fn attach_backend(&mut self, nick: &str, backend: BoxedBackend) -> RuntimeResult<()> {
        if self.config.bot(nick).is_none() {
            return Err(RuntimeError::BotNotFound(nick.to_string()));
        }
        if self.backends.contains_key(nick) {
            return Err(RuntimeError::BackendExists(nick.to_string()));
        }
        info!(bot = nick, backend = %backend.name(), "Attached backend");
        self.backends.insert(nick.to_string(), backend);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.read().await.is_some()
    }

    /// The running bot with this nick.
    pub async fn bot(&self, nick: &str) -> Option<Arc<Bot>> {
        self.running
            .read()
            .await
            .as_ref()?
            .bots
            .iter()
            .find(|b| b.nick() == nick)
            .cloned()
    }

    pub async fn bots(&self) -> Vec<Arc<Bot>> {
        self.running
            .read()
            .await
            .as_ref()
            .map(|r| r.bots.clone())
            .unwrap_or_default()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Builds every configured bot, loads its plugins and starts delivering
    /// its actions.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut running = self.running.write().await;
        if running.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }

        let mut backends = Vec::with_capacity(self.config.bots.len());
        for bot in &self.config.bots {
            let backend = self
                .backends
                .get(&bot.nick)
                .cloned()
                .ok_or_else(|| RuntimeError::MissingBackend(bot.nick.clone()))?;
            backends.push(backend);
        }

        info!(bots = self.config.bots.len(), "Starting Ember runtime");

        let token = CancellationToken::new();
        let mut bots = Vec::with_capacity(backends.len());
        let mut tasks = Vec::with_capacity(backends.len());
        for (config, backend) in self.config.bots.iter().zip(backends) {
            let bot = Arc::new(Bot::new(
                config,
                self.config.manager_config(),
                &self.registry,
                backend,
            ));
            tasks.push(tokio::spawn({
                let bot = bot.clone();
                let token = token.child_token();
                async move { bot.run(token).await }
            }));
            bots.push(bot);
        }

        *running = Some(Running { bots, tasks, token });
        info!("Runtime started");
        Ok(())
    }

    /// Stops every bot: queued actions are flushed, then plugins are disabled.
    pub async fn stop(&self) -> RuntimeResult<()> {
        let Some(running) = self.running.write().await.take() else {
            warn!("Runtime is not running");
            return Ok(());
        };

        info!("Stopping Ember runtime");
        running.token.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Bot action loop terminated abnormally");
            }
        }
        for bot in &running.bots {
            bot.shutdown();
        }

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Ember runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

impl Default for EmberRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "builtin")]
fn default_registry() -> PluginRegistry {
    PluginRegistry::with_builtins()
}

#[cfg(not(feature = "builtin"))]
fn default_registry() -> PluginRegistry {
    PluginRegistry::new()
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for an [`EmberRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    registry: Option<PluginRegistry>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            registry: None,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses `config` as base values below any file or environment source.
    pub fn merge(mut self, config: EmberConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// The plugin modules to install instead of the built-in ones.
    pub fn registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> ConfigResult<EmberRuntime> {
        let config = self.config_loader.load()?;
        let mut runtime = EmberRuntime::from_config(config);
        if let Some(registry) = self.registry {
            runtime.set_registry(registry);
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::{ChannelBackend, echo_registry};
    use crate::config::BotConfig;
    use serde_json::json;

    fn config(nicks: &[&str]) -> EmberConfig {
        EmberConfig {
            bots: nicks.iter().map(|n| BotConfig::new(*n)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_attach_backend_checks_nick() {
        let mut runtime = EmberRuntime::from_config(config(&["a"]));
        let (backend, _rx) = ChannelBackend::new();

        assert!(matches!(
            runtime.attach_backend("b", backend.clone()),
            Err(RuntimeError::BotNotFound(_))
        ));
        runtime.attach_backend("a", backend.clone()).unwrap();
        assert!(matches!(
            runtime.attach_backend("a", backend),
            Err(RuntimeError::BackendExists(_))
        ));
    }

    #[tokio::test]
    async fn test_start_requires_backends() {
        let runtime = EmberRuntime::from_config(config(&["a"]));
        assert!(matches!(
            runtime.start().await,
            Err(RuntimeError::MissingBackend(nick)) if nick == "a"
        ));
        assert!(!runtime.is_running().await);
    }

    #[tokio::test]
    async fn test_lifecycle_routes_actions() {
        let mut runtime = EmberRuntime::from_config(config(&["a", "b"]));
        runtime.set_registry(echo_registry());
        let (backend_a, mut rx_a) = ChannelBackend::new();
        let (backend_b, mut rx_b) = ChannelBackend::new();
        runtime.attach_backend("a", backend_a).unwrap();
        runtime.attach_backend("b", backend_b).unwrap();

        runtime.start().await.unwrap();
        assert!(runtime.is_running().await);
        assert!(matches!(
            runtime.start().await,
            Err(RuntimeError::AlreadyRunning)
        ));
        assert_eq!(runtime.bots().await.len(), 2);

        let bot = runtime.bot("b").await.unwrap();
        bot.process_raw(json!({
            "type": "message",
            "room": "#b",
            "meta": { "body": "!echo to b" }
        }))
        .unwrap();

        let action = rx_b.recv().await.unwrap();
        assert_eq!(action.body(), Some("to b"));
        assert!(rx_a.try_recv().is_err());

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running().await);
        assert!(runtime.bot("b").await.is_none());
    }

    #[tokio::test]
    async fn test_run_until_shuts_down() {
        let mut runtime = EmberRuntime::from_config(config(&["a"]));
        let (backend, _rx) = ChannelBackend::new();
        runtime.attach_backend("a", backend).unwrap();

        runtime.run_until(async {}).await.unwrap();
        assert!(!runtime.is_running().await);
    }
}
