//! Tokio-backed [`Scheduler`] with a single execution lane.
//!
//! Timers are plain tokio tasks that only *wait*; when a timer fires it pushes
//! its job onto one unbounded channel drained by a single lane task, which is
//! the only place jobs execute. Shutdown is broadcast over a `watch` channel.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{RepeatingTask, Scheduler, Task, TimerHandle};
use crate::error::{Result, RewsError};

enum JobKind {
    Once(Task),
    Tick(RepeatingTask),
}

struct Job {
    timer: TimerHandle,
    kind: JobKind,
}

/// Single-lane scheduler running on a tokio runtime.
pub struct TokioScheduler {
    runtime: Handle,
    lane_tx: mpsc::UnboundedSender<Job>,
    shutdown_tx: watch::Sender<bool>,
}

impl TokioScheduler {
    /// Create a scheduler and spawn its lane task on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        let (lane_tx, lane_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        runtime.spawn(lane_loop(lane_rx, shutdown_rx));

        Self { runtime, lane_tx, shutdown_tx }
    }

    /// Create a scheduler on the runtime of the calling context.
    pub fn try_current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| RewsError::Config(format!("no tokio runtime for scheduler: {e}")))?;
        Ok(Self::new(runtime))
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) -> TimerHandle {
        if self.is_shut_down() {
            return TimerHandle::cancelled();
        }

        let timer = TimerHandle::new();
        let job_timer = timer.clone();
        let lane_tx = self.lane_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if !job_timer.is_cancelled() {
                        let _ = lane_tx.send(Job { timer: job_timer, kind: JobKind::Once(task) });
                    }
                }
                _ = job_timer.wait_cancelled() => {}
                _ = shutdown_rx.changed() => {}
            }
        });

        timer
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        if self.is_shut_down() {
            return TimerHandle::cancelled();
        }
        if period.is_zero() {
            warn!("[scheduler] refusing repeating timer with zero period");
            return TimerHandle::cancelled();
        }

        let timer = TimerHandle::new();
        let job_timer = timer.clone();
        let lane_tx = self.lane_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if job_timer.is_cancelled() {
                            return;
                        }
                        let job = Job { timer: job_timer.clone(), kind: JobKind::Tick(task.clone()) };
                        if lane_tx.send(job).is_err() {
                            return;
                        }
                    }
                    _ = job_timer.wait_cancelled() => return,
                    _ = shutdown_rx.changed() => return,
                }
            }
        });

        timer
    }

    fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("[scheduler] shutdown");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drain the job channel one job at a time until shutdown.
async fn lane_loop(mut lane_rx: mpsc::UnboundedReceiver<Job>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!("[scheduler] lane stopped");
                return;
            }

            job = lane_rx.recv() => {
                let Some(job) = job else { return };
                // A timer may be cancelled between firing and running.
                if job.timer.is_cancelled() {
                    continue;
                }
                match job.kind {
                    JobKind::Once(task) => task(),
                    JobKind::Tick(task) => task(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn once_runs_after_delay() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler.schedule_once(Duration::from_millis(20), Box::new(move || {
            let _ = tx.send(());
        }));

        tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelled_once_never_runs() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();

        let timer = scheduler.schedule_once(Duration::from_millis(20), Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        timer.cancel();
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeating_ticks_until_cancelled() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();

        let timer = scheduler.schedule_repeating(Duration::from_millis(10), Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.cancel();
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, got {seen}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn zero_period_is_refused() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();

        let timer = scheduler.schedule_repeating(Duration::ZERO, Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(timer.is_cancelled());

        // The lane keeps working afterwards.
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.schedule_once(Duration::from_millis(10), Box::new(move || {
            let _ = tx.send(());
        }));
        tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_timers() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();

        let pending = scheduler.schedule_once(Duration::from_millis(30), Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.shutdown();
        scheduler.shutdown();

        let late = scheduler.schedule_once(Duration::ZERO, Box::new(|| {}));
        assert!(late.is_cancelled());
        assert!(!pending.is_cancelled());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
