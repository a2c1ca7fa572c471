//! Per-plugin delayed and repeating tasks.
//!
//! Each [`ScheduledTask`] runs as its own tokio task that waits on a timer or
//! its cancellation token, whichever comes first. Firing happens outside the
//! `select!`, so cancelling a task never interrupts a run that already
//! started; it only prevents the next one.
//!
//! ```text
//! Pending ──timer──▶ Running ──▶ Pending   (repeating)
//!    │                  │    └─▶ Done      (one-shot)
//!    └──cancel()──▶ Cancelled ◀──┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ember_core::{Action, BotIdentity};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::executor::WorkerPool;
use crate::handler::{TaskFn, invoke, task_fn};
use crate::reply::{Reply, build_action};

/// How often the janitor prunes finished one-shot tasks.
pub const JANITOR_INTERVAL: Duration = Duration::from_secs(15);

/// Longest repeating interval; anything above is clamped to roughly 30 years.
pub const MAX_INTERVAL: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    OneShot,
    Repeating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Cancelled,
}

/// Shared by every task of one plugin instance.
pub(crate) struct TaskContext {
    pub(crate) label: String,
    pub(crate) identity: Arc<BotIdentity>,
    pub(crate) outbox: mpsc::UnboundedSender<Action>,
    pub(crate) pool: Arc<WorkerPool>,
}

impl TaskContext {
    pub(crate) fn queue(&self, action: Action) {
        if self.outbox.send(action).is_err() {
            warn!(plugin = %self.label, "Action queue closed, dropping action");
        }
    }
}

/// One delayed or repeating invocation.
pub struct ScheduledTask {
    id: u64,
    kind: TaskKind,
    period: Duration,
    run_immediately: bool,
    threaded: bool,
    state: Mutex<TaskState>,
    token: CancellationToken,
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("period", &self.period)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ScheduledTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn run_immediately(&self) -> bool {
        self.run_immediately
    }

    pub fn threaded(&self) -> bool {
        self.threaded
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Whether the task will not fire again.
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Done | TaskState::Cancelled)
    }

    fn cancel(&self) {
        {
            let mut state = self.state.lock();
            if *state != TaskState::Done {
                *state = TaskState::Cancelled;
            }
        }
        self.token.cancel();
    }

    /// Moves to `next` unless the task was cancelled meanwhile.
    fn transition(&self, next: TaskState) -> bool {
        let mut state = self.state.lock();
        if *state == TaskState::Cancelled {
            return false;
        }
        *state = next;
        true
    }
}

/// Handle returned when scheduling a task.
#[derive(Debug, Clone)]
pub struct TaskHandle(Arc<ScheduledTask>);

impl TaskHandle {
    /// Prevents any future firing. A run already in progress completes.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn state(&self) -> TaskState {
        self.0.state()
    }

    pub fn task(&self) -> &ScheduledTask {
        &self.0
    }
}

/// The delayed and repeating task lists of one plugin instance.
pub struct TaskScheduler {
    ctx: Arc<TaskContext>,
    delayed: Mutex<Vec<Arc<ScheduledTask>>>,
    looping: Mutex<Vec<Arc<ScheduledTask>>>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    pub(crate) fn new(ctx: TaskContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            delayed: Mutex::new(Vec::new()),
            looping: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn create(
        &self,
        kind: TaskKind,
        period: Duration,
        run_immediately: bool,
        threaded: bool,
    ) -> Arc<ScheduledTask> {
        Arc::new(ScheduledTask {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            period,
            run_immediately,
            threaded,
            state: Mutex::new(TaskState::Pending),
            token: CancellationToken::new(),
        })
    }

    /// Runs `f` once after `delay`.
    pub fn delay(&self, delay: Duration, threaded: bool, f: TaskFn) -> TaskHandle {
        let task = self.create(TaskKind::OneShot, delay, false, threaded);
        debug!(plugin = %self.ctx.label, task = task.id, ?delay, "Scheduling delayed task");
        self.delayed.lock().push(task.clone());
        tokio::spawn(run_once(task.clone(), f, self.ctx.clone()));
        TaskHandle(task)
    }

    /// Runs `f` every `interval`, starting now when `run_immediately`.
    ///
    /// A zero interval is raised to one millisecond and anything longer than
    /// [`MAX_INTERVAL`] is clamped to it.
    pub fn repeat(
        &self,
        interval: Duration,
        run_immediately: bool,
        threaded: bool,
        f: TaskFn,
    ) -> TaskHandle {
        let interval = interval.clamp(Duration::from_millis(1), MAX_INTERVAL);
        let task = self.create(TaskKind::Repeating, interval, run_immediately, threaded);
        debug!(
            plugin = %self.ctx.label,
            task = task.id,
            ?interval,
            run_immediately,
            "Scheduling repeating task"
        );
        self.looping.lock().push(task.clone());
        tokio::spawn(run_repeating(task.clone(), f, self.ctx.clone()));
        TaskHandle(task)
    }

    /// Drops finished one-shot tasks from the delayed list.
    pub fn prune(&self) -> usize {
        let mut delayed = self.delayed.lock();
        let before = delayed.len();
        delayed.retain(|task| !task.is_finished());
        before - delayed.len()
    }

    /// Starts the periodic [`prune`](Self::prune) job.
    pub(crate) fn start_janitor(self: &Arc<Self>) -> TaskHandle {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        self.repeat(
            JANITOR_INTERVAL,
            false,
            false,
            task_fn(move || {
                if let Some(scheduler) = scheduler.upgrade() {
                    let pruned = scheduler.prune();
                    trace!(pruned, "Janitor pruned finished tasks");
                }
            }),
        )
    }

    /// Cancels every task and empties both lists.
    pub fn cancel_all(&self) {
        let delayed = std::mem::take(&mut *self.delayed.lock());
        let looping = std::mem::take(&mut *self.looping.lock());
        let count = delayed.len() + looping.len();
        for task in delayed.iter().chain(looping.iter()) {
            task.cancel();
        }
        debug!(plugin = %self.ctx.label, count, "Cancelled all tasks");
    }

    /// Number of entries in the delayed list, finished or not.
    pub fn delayed_count(&self) -> usize {
        self.delayed.lock().len()
    }

    /// Number of entries in the repeating list.
    pub fn looping_count(&self) -> usize {
        self.looping.lock().len()
    }

    pub(crate) fn context(&self) -> &TaskContext {
        &self.ctx
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn fire(task: &ScheduledTask, f: &TaskFn, ctx: &TaskContext) {
    if !task.transition(TaskState::Running) {
        return;
    }
    let label = format!("{}::task#{}", ctx.label, task.id);
    trace!(task = %label, "Firing task");

    let reply: Option<Reply> = if task.threaded {
        let f = f.clone();
        ctx.pool.submit(label, move || f()).await
    } else {
        invoke(&label, || f())
    };

    if let Some(action) = reply.and_then(|r| build_action(r, None, &ctx.identity)) {
        ctx.queue(action);
    }
}

async fn run_once(task: Arc<ScheduledTask>, f: TaskFn, ctx: Arc<TaskContext>) {
    tokio::select! {
        _ = task.token.cancelled() => return,
        _ = sleep(task.period) => {}
    }
    fire(&task, &f, &ctx).await;
    task.transition(TaskState::Done);
}

async fn run_repeating(task: Arc<ScheduledTask>, f: TaskFn, ctx: Arc<TaskContext>) {
    let now = Instant::now();
    let start = if task.run_immediately {
        now
    } else {
        now.checked_add(task.period)
            .or_else(|| now.checked_add(MAX_INTERVAL))
            .unwrap_or(now)
    };
    let mut ticker = interval_at(start, task.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = task.token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        fire(&task, &f, &ctx).await;
        if !task.transition(TaskState::Pending) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::executor::WorkerPool;

    fn scheduler() -> (Arc<TaskScheduler>, mpsc::UnboundedReceiver<Action>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let ctx = TaskContext {
            label: "test".into(),
            identity: Arc::new(BotIdentity::new("ember").with_default_rooms(["lobby"])),
            outbox,
            pool: WorkerPool::new(2),
        };
        (Arc::new(TaskScheduler::new(ctx)), rx)
    }

    fn counter() -> (Arc<AtomicUsize>, TaskFn) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            count,
            task_fn(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_task_fires_immediately_then_every_interval() {
        let (scheduler, _rx) = scheduler();
        let (count, f) = counter();
        let handle = scheduler.repeat(Duration::from_secs(5), true, false, f);

        sleep(Duration::from_millis(10_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.cancel();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_task_without_immediate_run() {
        let (scheduler, _rx) = scheduler();
        let (count, f) = counter();
        scheduler.repeat(Duration::from_secs(5), false, false, f);

        sleep(Duration::from_millis(4_900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_is_clamped() {
        let (scheduler, _rx) = scheduler();
        for run_immediately in [false, true] {
            let (count, f) = counter();
            let handle = scheduler.repeat(Duration::MAX, run_immediately, false, f);
            assert_eq!(handle.0.period, MAX_INTERVAL);

            sleep(Duration::from_secs(3600)).await;
            assert_eq!(count.load(Ordering::SeqCst), usize::from(run_immediately));
            assert_eq!(handle.state(), TaskState::Pending);
            // Still owned by the list, the handle and its live timer task.
            assert_eq!(Arc::strong_count(&handle.0), 3);

            handle.cancel();
            assert_eq!(handle.state(), TaskState::Cancelled);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_task_fires_once() {
        let (scheduler, _rx) = scheduler();
        let (count, f) = counter();
        let handle = scheduler.delay(Duration::from_secs(2), false, f);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), TaskState::Pending);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), TaskState::Done);

        assert_eq!(scheduler.prune(), 1);
        assert_eq!(scheduler.delayed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_delay_never_fires() {
        let (scheduler, _rx) = scheduler();
        let (count, f) = counter();
        let handle = scheduler.delay(Duration::from_secs(2), false, f);
        handle.cancel();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_everything() {
        let (scheduler, _rx) = scheduler();
        let (count, _) = counter();
        for i in 0..3 {
            let c = count.clone();
            scheduler.delay(
                Duration::from_secs(10 + i),
                false,
                task_fn(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        for _ in 0..2 {
            let c = count.clone();
            scheduler.repeat(
                Duration::from_secs(3),
                false,
                false,
                task_fn(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(scheduler.delayed_count(), 3);
        assert_eq!(scheduler.looping_count(), 2);

        scheduler.cancel_all();
        assert_eq!(scheduler.delayed_count(), 0);
        assert_eq!(scheduler.looping_count(), 0);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_reply_is_queued_for_default_rooms() {
        let (scheduler, mut rx) = scheduler();
        scheduler.delay(Duration::from_secs(1), false, task_fn(|| "tick"));

        let action = rx.recv().await.unwrap();
        assert_eq!(action.body(), Some("tick"));
        assert_eq!(action.destination_rooms(), ["lobby"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_prunes_finished_one_shots() {
        let (scheduler, _rx) = scheduler();
        scheduler.start_janitor();
        let (_, f) = counter();
        scheduler.delay(Duration::from_secs(1), false, f);
        assert_eq!(scheduler.delayed_count(), 1);

        sleep(Duration::from_secs(14)).await;
        assert_eq!(scheduler.delayed_count(), 1);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.delayed_count(), 0);
        assert_eq!(scheduler.looping_count(), 1);
    }
}
