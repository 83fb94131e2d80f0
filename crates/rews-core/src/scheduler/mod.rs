//! Single-lane timer facility used for reconnect delays and periodic sends.
//!
//! A [`Scheduler`] runs deferred and repeating tasks one at a time: no two
//! tasks of the same scheduler ever execute concurrently. Every scheduled task
//! is paired with a [`TimerHandle`] whose `cancel()` is idempotent and safe
//! after the timer already fired.

pub mod lane;
pub mod manual;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

pub use lane::TokioScheduler;
pub use manual::ManualScheduler;

/// A task that runs once.
pub type Task = Box<dyn FnOnce() + Send>;

/// A task that runs on every tick of a repeating timer.
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct TimerState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation handle for a scheduled task.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    state: Arc<TimerState>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is already cancelled (returned after shutdown).
    pub fn cancelled() -> Self {
        let handle = Self::new();
        handle.cancel();
        handle
    }

    /// Cancel the timer. Cancelling twice, or after the task ran, is a no-op.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::AcqRel) {
            // notify_one stores a permit, so a waiter that arrives late still wakes.
            self.state.notify.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn wait_cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.state.notify.notified().await;
    }
}

/// Deferred and periodic task execution on one background lane.
///
/// Implementations must not run a task inline from `schedule_*`; callers may
/// hold locks while scheduling.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule_once(&self, delay: Duration, task: Task) -> TimerHandle;

    /// Run `task` every `period`, first run one `period` from now.
    ///
    /// A zero `period` is refused with an already-cancelled handle.
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle;

    /// Cancel every pending and periodic timer and refuse new ones.
    fn shutdown(&self);
}
