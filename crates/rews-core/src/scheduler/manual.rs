//! Deterministic [`Scheduler`] driven by a virtual clock.
//!
//! Nothing runs until the owner calls [`ManualScheduler::advance`], which
//! executes every due task in (due time, insertion order). Useful for driving
//! a socket step by step without sleeping.

use std::time::Duration;

use parking_lot::Mutex;

use super::{RepeatingTask, Scheduler, Task, TimerHandle};

enum EntryKind {
    Once(Task),
    Repeating { period: Duration, task: RepeatingTask },
}

struct Entry {
    due: Duration,
    seq: u64,
    timer: TimerHandle,
    kind: EntryKind,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    seq: u64,
    entries: Vec<Entry>,
    shut_down: bool,
}

impl ManualState {
    fn push(&mut self, due: Duration, kind: EntryKind) -> TimerHandle {
        if self.shut_down {
            return TimerHandle::cancelled();
        }
        let timer = TimerHandle::new();
        self.seq += 1;
        self.entries.push(Entry { due, seq: self.seq, timer: timer.clone(), kind });
        timer
    }

    /// Remove and return the earliest live entry due at or before `until`.
    fn pop_due(&mut self, until: Duration) -> Option<Entry> {
        self.entries.retain(|e| !e.timer.is_cancelled());
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due <= until)
            .min_by_key(|(_, e)| (e.due, e.seq))
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(idx))
    }
}

/// Virtual-clock scheduler.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since creation.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of live (not cancelled) timers.
    pub fn pending(&self) -> usize {
        self.state.lock().entries.iter().filter(|e| !e.timer.is_cancelled()).count()
    }

    /// Remaining delay of every live timer, soonest first.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.state.lock();
        let mut delays: Vec<Duration> = state
            .entries
            .iter()
            .filter(|e| !e.timer.is_cancelled())
            .map(|e| e.due.saturating_sub(state.now))
            .collect();
        delays.sort();
        delays
    }

    /// Move the clock forward by `by`, running every task that becomes due.
    ///
    /// Tasks run without the internal lock held, so they may schedule or
    /// cancel timers themselves. Returns the number of task executions.
    pub fn advance(&self, by: Duration) -> usize {
        let until = self.state.lock().now + by;
        let mut ran = 0;

        loop {
            let entry = {
                let mut state = self.state.lock();
                match state.pop_due(until) {
                    Some(entry) => {
                        state.now = entry.due;
                        entry
                    }
                    None => break,
                }
            };

            ran += 1;
            match entry.kind {
                EntryKind::Once(task) => task(),
                EntryKind::Repeating { period, task } => {
                    task();
                    let mut state = self.state.lock();
                    if !entry.timer.is_cancelled() && !state.shut_down {
                        state.entries.push(Entry {
                            due: entry.due + period,
                            seq: entry.seq,
                            timer: entry.timer,
                            kind: EntryKind::Repeating { period, task },
                        });
                    }
                }
            }
        }

        self.state.lock().now = until;
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) -> TimerHandle {
        let mut state = self.state.lock();
        let due = state.now + delay;
        state.push(due, EntryKind::Once(task))
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        if period.is_zero() {
            return TimerHandle::cancelled();
        }
        let mut state = self.state.lock();
        let due = state.now + period;
        state.push(due, EntryKind::Repeating { period, task })
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        for entry in state.entries.drain(..) {
            entry.timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        (log, move |name| {
            let l = l.clone();
            Box::new(move || l.lock().push(name)) as Task
        })
    }

    #[test]
    fn once_runs_only_when_due() {
        let s = ManualScheduler::new();
        let (log, task) = recorder();

        s.schedule_once(Duration::from_secs(2), task("a"));
        assert_eq!(s.advance(Duration::from_secs(1)), 0);
        assert_eq!(s.pending_delays(), vec![Duration::from_secs(1)]);
        assert_eq!(s.advance(Duration::from_secs(1)), 1);
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn runs_in_due_then_insertion_order() {
        let s = ManualScheduler::new();
        let (log, task) = recorder();

        s.schedule_once(Duration::from_secs(3), task("late"));
        s.schedule_once(Duration::from_secs(1), task("first"));
        s.schedule_once(Duration::from_secs(1), task("second"));
        s.advance(Duration::from_secs(5));
        assert_eq!(*log.lock(), vec!["first", "second", "late"]);
        assert_eq!(s.now(), Duration::from_secs(5));
    }

    #[test]
    fn cancel_before_and_after_firing() {
        let s = ManualScheduler::new();
        let (log, task) = recorder();

        let t = s.schedule_once(Duration::from_secs(1), task("x"));
        t.cancel();
        s.advance(Duration::from_secs(2));
        assert!(log.lock().is_empty());

        let t = s.schedule_once(Duration::from_secs(1), task("y"));
        s.advance(Duration::from_secs(1));
        t.cancel();
        t.cancel();
        assert_eq!(*log.lock(), vec!["y"]);
    }

    #[test]
    fn repeating_rearms_each_period() {
        let s = ManualScheduler::new();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();

        let t = s.schedule_repeating(Duration::from_secs(5), Arc::new(move || *h.lock() += 1));
        s.advance(Duration::from_secs(4));
        assert_eq!(*hits.lock(), 0);
        s.advance(Duration::from_secs(11));
        assert_eq!(*hits.lock(), 3);

        t.cancel();
        s.advance(Duration::from_secs(50));
        assert_eq!(*hits.lock(), 3);
    }

    #[test]
    fn zero_period_repeating_is_refused() {
        let s = ManualScheduler::new();
        let t = s.schedule_repeating(Duration::ZERO, Arc::new(|| {}));
        assert!(t.is_cancelled());
        assert_eq!(s.pending(), 0);
        assert_eq!(s.advance(Duration::from_secs(1)), 0);
    }

    #[test]
    fn task_may_schedule_more_work() {
        let s = Arc::new(ManualScheduler::new());
        let (log, task) = recorder();
        let inner = s.clone();
        let follow_up = task("follow-up");

        s.schedule_once(Duration::from_secs(1), Box::new(move || {
            inner.schedule_once(Duration::ZERO, follow_up);
        }));
        s.advance(Duration::from_secs(1));
        assert_eq!(*log.lock(), vec!["follow-up"]);
    }

    #[test]
    fn shutdown_cancels_everything() {
        let s = ManualScheduler::new();
        let (log, task) = recorder();

        let t = s.schedule_once(Duration::from_secs(1), task("a"));
        s.schedule_repeating(Duration::from_secs(1), Arc::new(|| {}));
        s.shutdown();

        assert!(t.is_cancelled());
        assert_eq!(s.pending(), 0);
        assert!(s.schedule_once(Duration::ZERO, task("b")).is_cancelled());
        s.advance(Duration::from_secs(3));
        assert!(log.lock().is_empty());
    }
}
