//! The execution context of one plugin instance.
//!
//! Every plugin instance gets its own [`PluginRuntime`], owned jointly by the
//! [`PluginManager`](crate::PluginManager) and the plugin itself. It carries:
//!
//! - the plugin's task lists ([`delay_task`](PluginRuntime::delay_task),
//!   [`loop_task`](PluginRuntime::loop_task)),
//! - its open storages ([`open_storage`](PluginRuntime::open_storage)),
//! - a route for self-initiated messages ([`msg`](PluginRuntime::msg)).
//!
//! ```rust,ignore
//! struct Reminder {
//!     runtime: Arc<PluginRuntime>,
//! }
//!
//! impl BotPlugin for Reminder {
//!     fn setup(&self) -> Result<(), BoxError> {
//!         let store = self.runtime.open_storage("seen")?;
//!         self.runtime.loop_task(Duration::from_secs(3600), move || {
//!             let n: u64 = store.get("count").ok().flatten().unwrap_or(0);
//!             format!("{n} messages seen so far")
//!         });
//!         Ok(())
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ember_core::{Action, ActionResult, BotIdentity, Event};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::executor::WorkerPool;
use crate::handler::task_fn;
use crate::plugin::scheduler::{TaskContext, TaskHandle, TaskScheduler};
use crate::plugin::storage::{StorageConfig, Store};
use crate::reply::{IntoReply, build_message};

pub struct PluginRuntime {
    name: String,
    config: Value,
    storage: StorageConfig,
    scheduler: Arc<TaskScheduler>,
    shelves: Mutex<HashMap<String, Arc<Store>>>,
    active: AtomicBool,
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("name", &self.name)
            .field("bot", &self.identity().nick())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl PluginRuntime {
    pub(crate) fn new(
        name: impl Into<String>,
        identity: Arc<BotIdentity>,
        config: Value,
        storage: StorageConfig,
        outbox: mpsc::UnboundedSender<Action>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let name = name.into();
        let scheduler = TaskScheduler::new(TaskContext {
            label: name.clone(),
            identity,
            outbox,
            pool,
        });
        Arc::new(Self {
            name,
            config,
            storage,
            scheduler: Arc::new(scheduler),
            shelves: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
        })
    }

    /// The plugin's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bot this instance belongs to.
    pub fn identity(&self) -> &Arc<BotIdentity> {
        &self.scheduler.context().identity
    }

    /// The plugin's raw configuration section (`Null` when absent).
    pub fn config_value(&self) -> &Value {
        &self.config
    }

    /// Deserializes the plugin configuration section into `T`.
    ///
    /// An absent section deserializes from an empty table, so `T` can use
    /// `#[serde(default)]` to make every field optional.
    pub fn config<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.config {
            Value::Null => T::deserialize(&Value::Object(Default::default())),
            value => T::deserialize(value),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    // ─── Tasks ───────────────────────────────────────────────────────────────

    /// Runs `f` once after `delay`, inline.
    pub fn delay_task<F, R>(&self, delay: Duration, f: F) -> TaskHandle
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.delay_task_with(delay, false, f)
    }

    /// Runs `f` once after `delay`, on the worker pool when `threaded`.
    pub fn delay_task_with<F, R>(&self, delay: Duration, threaded: bool, f: F) -> TaskHandle
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.scheduler.delay(delay, threaded, task_fn(f))
    }

    /// Runs `f` now and then every `interval`, inline.
    pub fn loop_task<F, R>(&self, interval: Duration, f: F) -> TaskHandle
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.loop_task_with(interval, true, false, f)
    }

    /// Runs `f` every `interval`; the first run happens immediately only when
    /// `run_immediately` is set.
    pub fn loop_task_with<F, R>(
        &self,
        interval: Duration,
        run_immediately: bool,
        threaded: bool,
        f: F,
    ) -> TaskHandle
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.scheduler
            .repeat(interval, run_immediately, threaded, task_fn(f))
    }

    /// Polls `f` every `interval`. Same as [`loop_task`](Self::loop_task).
    pub fn start_poller<F, R>(&self, interval: Duration, f: F) -> TaskHandle
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.loop_task(interval, f)
    }

    // ─── Storage ─────────────────────────────────────────────────────────────

    /// Opens the store `name`, or returns the already open handle.
    pub fn open_storage(&self, name: &str) -> StorageResult<Arc<Store>> {
        let mut shelves = self.shelves.lock();
        if let Some(store) = shelves.get(name) {
            return Ok(store.clone());
        }
        let path = self
            .storage
            .path_for(self.identity().nick(), &self.name, name)?;
        let store = Arc::new(Store::open(name, path)?);
        shelves.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Closes the store `name`.
    ///
    /// Fails with [`StorageError::NotFound`] when no such store is open,
    /// including when it was already closed.
    pub fn close_storage(&self, name: &str) -> StorageResult<()> {
        let store = self.shelves.lock().remove(name).ok_or_else(|| {
            error!(plugin = %self.name, storage = %name, "No storage called '{name}' found");
            StorageError::NotFound(name.to_string())
        })?;
        store.close()
    }

    /// Closes every open store. Failures are logged.
    pub fn close_storages(&self) {
        let shelves = std::mem::take(&mut *self.shelves.lock());
        for (name, store) in shelves {
            if let Err(e) = store.close() {
                warn!(plugin = %self.name, storage = %name, error = %e, "Failed to close storage");
            }
        }
    }

    /// Names of the currently open stores, sorted.
    pub fn open_storages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shelves.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // ─── Actions ─────────────────────────────────────────────────────────────

    /// Queues an action for delivery by the owning bot.
    pub fn queue_action(&self, action: Action) {
        self.scheduler.context().queue(action);
    }

    /// Sends a message that no handler reply asked for.
    ///
    /// Without a `room` the message answers `event`, or goes to the bot's
    /// default rooms when there is no event either.
    pub fn msg(
        &self,
        body: impl Into<String>,
        room: Option<&str>,
        event: Option<&Arc<Event>>,
    ) -> ActionResult<()> {
        let action = build_message(body, room, event, self.identity())?;
        self.queue_action(action);
        Ok(())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Resets the task lists, starts the janitor and marks the instance active.
    pub fn enable(&self) {
        info!(plugin = %self.name, bot = %self.identity().nick(), "Enabling plugin");
        self.scheduler.cancel_all();
        self.scheduler.start_janitor();
        self.active.store(true, Ordering::Release);
    }

    /// Marks the instance inactive and cancels all of its tasks.
    ///
    /// A task that is already running finishes; nothing fires afterwards.
    pub fn disable(&self) {
        info!(plugin = %self.name, bot = %self.identity().nick(), "Disabling plugin");
        self.active.store(false, Ordering::Release);
        self.scheduler.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use serde::Deserialize;
    use serde_json::json;

    fn runtime(
        data_dir: &std::path::Path,
        config: Value,
    ) -> (Arc<PluginRuntime>, mpsc::UnboundedReceiver<Action>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let runtime = PluginRuntime::new(
            "quotes",
            Arc::new(BotIdentity::new("ember").with_default_rooms(["lobby"])),
            config,
            StorageConfig {
                data_dir: data_dir.to_path_buf(),
                suffix: ".db".into(),
            },
            outbox,
            WorkerPool::new(2),
        );
        (runtime, rx)
    }

    #[tokio::test]
    async fn test_open_storage_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _rx) = runtime(dir.path(), Value::Null);

        let first = runtime.open_storage("x").unwrap();
        let second = runtime.open_storage("x").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(dir.path().join("ember.quotes.x.db").exists());

        runtime.close_storage("x").unwrap();
        assert!(matches!(
            runtime.close_storage("x"),
            Err(StorageError::NotFound(name)) if name == "x"
        ));
        assert!(matches!(
            runtime.close_storage("never"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_storage_stays_in_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        let (runtime, _rx) = runtime(&data_dir, Value::Null);

        assert!(matches!(
            runtime.open_storage("../x"),
            Err(StorageError::InvalidName(_))
        ));
        assert!(runtime.open_storages().is_empty());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_close_storages_closes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _rx) = runtime(dir.path(), Value::Null);

        let a = runtime.open_storage("a").unwrap();
        let b = runtime.open_storage("b").unwrap();
        assert_eq!(runtime.open_storages(), ["a", "b"]);

        runtime.close_storages();
        assert!(runtime.open_storages().is_empty());
        assert!(!a.is_open());
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn test_msg_queues_self_initiated_action() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, mut rx) = runtime(dir.path(), Value::Null);

        runtime.msg("good morning", None, None).unwrap();
        let action = rx.recv().await.unwrap();
        assert_eq!(action.destination_rooms(), ["lobby"]);
        assert!(action.source_event().is_none());

        runtime.msg("psst", Some("alice"), None).unwrap();
        assert_eq!(rx.recv().await.unwrap().destination_rooms(), ["alice"]);

        assert!(runtime.msg("", None, None).is_err());
    }

    #[tokio::test]
    async fn test_typed_config() {
        #[derive(Deserialize)]
        struct QuotesConfig {
            #[serde(default)]
            max: u32,
        }

        let dir = tempfile::tempdir().unwrap();
        let (configured, _rx) = runtime(dir.path(), json!({ "max": 5 }));
        assert_eq!(configured.config::<QuotesConfig>().unwrap().max, 5);

        let (absent, _rx) = runtime(dir.path(), Value::Null);
        assert_eq!(absent.config::<QuotesConfig>().unwrap().max, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_all_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _rx) = runtime(dir.path(), Value::Null);
        runtime.enable();
        assert!(runtime.is_active());

        let fired = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let fired = fired.clone();
            runtime.delay_task(Duration::from_secs(5 + i), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..2 {
            let fired = fired.clone();
            runtime.loop_task_with(Duration::from_secs(2), false, false, move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(runtime.scheduler().delayed_count(), 3);
        // Two loops plus the janitor.
        assert_eq!(runtime.scheduler().looping_count(), 3);

        runtime.disable();
        assert!(!runtime.is_active());
        assert_eq!(runtime.scheduler().delayed_count(), 0);
        assert_eq!(runtime.scheduler().looping_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_poller_polls_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, mut rx) = runtime(dir.path(), Value::Null);
        runtime.enable();

        let polls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let polls = polls.clone();
            runtime.start_poller(Duration::from_secs(1), move || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                format!("poll {n}")
            })
        };

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        for n in 0..3 {
            let action = rx.try_recv().unwrap();
            assert_eq!(action.body(), Some(format!("poll {n}").as_str()));
            assert_eq!(action.destination_rooms(), ["lobby"]);
        }

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_resets_task_lists() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _rx) = runtime(dir.path(), Value::Null);
        runtime.delay_task(Duration::from_secs(5), || ());
        runtime.enable();

        assert_eq!(runtime.scheduler().delayed_count(), 0);
        assert_eq!(runtime.scheduler().looping_count(), 1);
    }
}
