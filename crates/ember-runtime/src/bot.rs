//! A running bot: one backend wired to one plugin manager.
//!
//! Inbound payloads go through [`Bot::process_raw`] (or
//! [`Bot::process_event`]) into the bot's [`PluginManager`]. Every action
//! the manager or its plugins produce lands on the bot's action queue, which
//! [`Bot::run`] drains into [`Backend::handle_action`].

use std::sync::Arc;

use ember_core::{Action, Backend, BotIdentity, BoxedBackend, Event};
use ember_framework::{
    DispatchResult, ManagerConfig, PendingResult, PluginManager, PluginRegistry,
};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;

pub struct Bot {
    identity: Arc<BotIdentity>,
    manager: PluginManager,
    backend: BoxedBackend,
    actions: Mutex<mpsc::UnboundedReceiver<Action>>,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("nick", &self.identity.nick())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Bot {
    /// Builds the bot and loads its enabled plugin modules.
    ///
    /// Modules or plugins that fail to register are logged and skipped. Must
    /// be called from within a Tokio runtime.
    pub fn new(
        config: &BotConfig,
        manager_config: ManagerConfig,
        registry: &PluginRegistry,
        backend: BoxedBackend,
    ) -> Self {
        let identity = config.identity();
        let (mut manager, actions) = PluginManager::with_channel(identity.clone(), manager_config);

        let failures = manager.start(registry, config.enabled_plugins.as_deref(), &config.plugins);
        if !failures.is_empty() {
            warn!(
                bot = %identity.nick(),
                failures = failures.len(),
                "Some plugins failed to load"
            );
        }
        info!(
            bot = %identity.nick(),
            backend = %backend.name(),
            commands = manager.command_docs().len(),
            "Bot ready"
        );

        Self {
            identity,
            manager,
            backend,
            actions: Mutex::new(actions),
        }
    }

    pub fn identity(&self) -> &Arc<BotIdentity> {
        &self.identity
    }

    pub fn nick(&self) -> &str {
        self.identity.nick()
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Dispatches a backend payload.
    pub fn process_raw(&self, raw: Value) -> DispatchResult<Vec<PendingResult>> {
        self.manager.process_raw(raw)
    }

    pub fn process_event(&self, event: Arc<Event>) -> DispatchResult<Vec<PendingResult>> {
        self.manager.process_event(event)
    }

    /// Delivers queued actions until `token` is cancelled, then flushes
    /// whatever is still queued.
    pub async fn run(&self, token: CancellationToken) {
        let mut actions = self.actions.lock().await;
        debug!(bot = %self.nick(), "Action loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = actions.recv() => match next {
                    Some(action) => self.deliver(action).await,
                    None => break,
                },
            }
        }

        while let Ok(action) = actions.try_recv() {
            self.deliver(action).await;
        }
        debug!(bot = %self.nick(), "Action loop stopped");
    }

    async fn deliver(&self, action: Action) {
        if !action.has_destination() {
            debug!(bot = %self.nick(), "Dropping action without destination");
            return;
        }
        if action.body().is_none_or(str::is_empty) {
            debug!(bot = %self.nick(), "Dropping action without body");
            return;
        }

        if let Err(e) = self.backend.handle_action(action).await {
            error!(
                bot = %self.nick(),
                backend = %self.backend.name(),
                error = %e,
                "Backend failed to deliver action"
            );
        }
    }

    /// Disables every plugin and closes its storages.
    pub fn shutdown(&self) {
        info!(bot = %self.nick(), "Shutting down bot");
        self.manager.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use ember_core::BackendResult;
    use ember_framework::{HandlerCall, Parser, PluginModule};
    use serde_json::json;

    /// Forwards every delivered action to a channel.
    pub(crate) struct ChannelBackend {
        tx: mpsc::UnboundedSender<Action>,
    }

    impl ChannelBackend {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Action>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    #[async_trait]
    impl Backend for ChannelBackend {
        fn name(&self) -> &str {
            "channel"
        }

        async fn handle_action(&self, action: Action) -> BackendResult<()> {
            let _ = self.tx.send(action);
            Ok(())
        }
    }

    pub(crate) fn echo_registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry.insert(PluginModule::new("echo").with_handler(Parser::cmd(
            "echo",
            |call: HandlerCall| call.args().join(" "),
        )));
        registry
    }

    fn bot_config() -> BotConfig {
        let mut config = BotConfig::new("ember");
        config.rooms = vec!["#home".into()];
        config
    }

    #[tokio::test]
    async fn test_reply_reaches_backend() {
        let (backend, mut delivered) = ChannelBackend::new();
        let bot = Arc::new(Bot::new(
            &bot_config(),
            ManagerConfig::default(),
            &echo_registry(),
            backend,
        ));
        let token = CancellationToken::new();
        let runner = tokio::spawn({
            let bot = bot.clone();
            let token = token.clone();
            async move { bot.run(token).await }
        });

        let pending = bot
            .process_raw(json!({
                "type": "message",
                "room": "#chat",
                "meta": { "body": "!echo hello world", "nick": "alice" }
            }))
            .unwrap();
        assert_eq!(pending.len(), 1);

        let action = delivered.recv().await.unwrap();
        assert_eq!(action.body(), Some("hello world"));
        assert_eq!(action.destination_rooms(), ["#chat"]);

        token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_undeliverable_actions_are_dropped() {
        let (backend, mut delivered) = ChannelBackend::new();
        let bot = Bot::new(
            &BotConfig::new("ember"),
            ManagerConfig::default(),
            &PluginRegistry::new(),
            backend,
        );

        let no_room = Action::message("lost").build().unwrap();
        bot.deliver(no_room).await;
        let ok = Action::message("kept").to_room("#a").build().unwrap();
        bot.deliver(ok).await;

        assert_eq!(delivered.recv().await.unwrap().body(), Some("kept"));
        assert!(delivered.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_flushes_queue_after_cancel() {
        let (backend, mut delivered) = ChannelBackend::new();
        let bot = Bot::new(
            &bot_config(),
            ManagerConfig::default(),
            &echo_registry(),
            backend,
        );

        for pending in bot
            .process_raw(json!({
                "type": "message",
                "room": "#chat",
                "meta": { "body": "!echo late" }
            }))
            .unwrap()
        {
            pending.wait().await;
        }

        let token = CancellationToken::new();
        token.cancel();
        bot.run(token).await;

        assert_eq!(delivered.recv().await.unwrap().body(), Some("late"));
    }

    #[tokio::test]
    async fn test_enabled_plugins_filter() {
        let (backend, _delivered) = ChannelBackend::new();
        let mut config = bot_config();
        config.enabled_plugins = Some(vec![]);

        let bot = Bot::new(&config, ManagerConfig::default(), &echo_registry(), backend);
        assert!(bot.manager().command_docs().is_empty());
    }
}
