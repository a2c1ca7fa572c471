//! Handler calling convention.
//!
//! A handler is a plain synchronous closure taking a [`HandlerCall`] and
//! returning anything that implements [`IntoReply`]. Threaded handlers run on
//! the blocking worker pool, so they may do blocking I/O.
//!
//! ```rust,ignore
//! let greet = Parser::on_match("greet", |call: HandlerCall| {
//!     let name = call.group(0).unwrap_or("stranger");
//!     format!("hello, {name}")
//! })
//! .regex(r"hi (\w+)")
//! .build()?;
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use ember_core::Event;
use tracing::error;

use crate::error::{BoxError, HandlerError};
use crate::reply::{IntoReply, Reply};

/// Command name → first line of the handler's documentation.
pub type CommandDocs = BTreeMap<String, Option<String>>;

/// Everything a handler receives for one invocation.
#[derive(Debug, Clone)]
pub struct HandlerCall {
    /// The triggering event.
    pub event: Arc<Event>,
    /// Capture groups of the trigger match, in pattern order.
    pub groups: Vec<Option<String>>,
    /// Command documentation known to the dispatching manager.
    pub docs: Arc<CommandDocs>,
}

impl HandlerCall {
    /// Arguments following the command word.
    pub fn args(&self) -> &[String] {
        self.event.args()
    }

    /// The `index`-th capture group, if it participated in the match.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }
}

/// Type-erased handler.
pub type HandlerFn = Arc<dyn Fn(HandlerCall) -> Result<Reply, BoxError> + Send + Sync>;

/// Type-erased scheduled task body.
pub type TaskFn = Arc<dyn Fn() -> Result<Reply, BoxError> + Send + Sync>;

/// Erases a handler closure.
pub fn handler_fn<F, R>(f: F) -> HandlerFn
where
    F: Fn(HandlerCall) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    Arc::new(move |call| f(call).into_reply())
}

/// Erases a task closure.
pub fn task_fn<F, R>(f: F) -> TaskFn
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoReply,
{
    Arc::new(move || f().into_reply())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs `f`, turning an `Err` or a panic into a [`HandlerError`].
pub(crate) fn guarded<F>(label: &str, f: F) -> Result<Reply, HandlerError>
where
    F: FnOnce() -> Result<Reply, BoxError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(HandlerError::Failed {
            label: label.to_string(),
            reason: e.to_string(),
        }),
        Err(payload) => Err(HandlerError::Panicked {
            label: label.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Like [`guarded`], but logs the failure and resolves it to "no reply".
pub(crate) fn invoke<F>(label: &str, f: F) -> Option<Reply>
where
    F: FnOnce() -> Result<Reply, BoxError>,
{
    match guarded(label, f) {
        Ok(reply) => Some(reply),
        Err(e) => {
            error!(handler = %label, error = %e, "Handler invocation failed");
            None
        }
    }
}
