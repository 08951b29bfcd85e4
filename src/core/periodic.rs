//! Periodic Tasks
//!
//! Two flavours of repeating work:
//!
//! - [`PeriodicTask`]: a spawned tokio task driven by an interval, with an
//!   optional iteration cap and an abort handle. Used for background lobby
//!   work (directory pings, record polling).
//! - [`Cadence`] / [`Deadline`]: tick-driven gates polled from the match
//!   driver's single loop, for timers that must stay on the game thread.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

/// Returned by a periodic job to keep running or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    /// Run again on the next period.
    Continue,
    /// Stop the task.
    Stop,
}

/// A cancellable repeating task.
///
/// The first run happens immediately. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` every `period`, at most `max_iterations` times.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        max_iterations: Option<u32>,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskControl> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0u32;

            loop {
                ticker.tick().await;
                if job().await == TaskControl::Stop {
                    debug!("Periodic task '{}' stopped itself", name);
                    break;
                }
                runs += 1;
                if max_iterations.is_some_and(|max| runs >= max) {
                    debug!("Periodic task '{}' reached {} iterations", name, runs);
                    break;
                }
            }
        });

        Self { name, handle }
    }

    /// Task name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Named set of periodic tasks.
///
/// Starting a task under a name already in use cancels the previous one.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: BTreeMap<&'static str, PeriodicTask>,
}

impl TaskSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, cancelling any task with the same name.
    pub fn start(&mut self, task: PeriodicTask) {
        if self.tasks.insert(task.name(), task).is_some() {
            debug!("Replaced running periodic task");
        }
    }

    /// Cancel one task. Returns true if it was running.
    pub fn cancel(&mut self, name: &str) -> bool {
        self.tasks.remove(name).is_some()
    }

    /// Cancel every task.
    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    /// Whether a live task runs under `name`.
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|t| !t.is_finished())
    }
}

// =============================================================================
// TICK-DRIVEN TIMERS
// =============================================================================

/// Repeating gate polled by a tick loop.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next_due: Option<Instant>,
}

impl Cadence {
    /// Create a stopped cadence.
    pub fn new(period: Duration) -> Self {
        Self { period, next_due: None }
    }

    /// Start; first fire after one period.
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now + self.period);
    }

    /// Stop firing.
    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    /// Whether the cadence is running.
    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// True once per elapsed period.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.period);
                true
            }
            _ => false,
        }
    }
}

/// One-shot gate polled by a tick loop.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Create a disarmed deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm to expire `after` from `now`.
    pub fn arm(&mut self, now: Instant, after: Duration) {
        self.at = Some(now + after);
    }

    /// Disarm.
    pub fn cancel(&mut self) {
        self.at = None;
    }

    /// Whether the deadline is armed.
    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// True exactly once, on the first poll at or past the deadline.
    pub fn fired(&mut self, now: Instant) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}
