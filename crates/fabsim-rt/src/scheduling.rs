//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Drift-corrected tick scheduling and task bookkeeping."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

/// What the scheduler decided for one timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPlan {
    /// Intended deadline of the tick being run.
    pub deadline: Instant,
    /// How far past `deadline` the timer fired.
    pub lateness: Duration,
    /// Whole intervals folded into this tick because the task fell behind.
    pub skipped: u64,
}

/// Fixed-cadence schedule whose deadlines are derived from the previous
/// *intended* deadline, so sleep jitter never accumulates into drift.
///
/// When the timer fires one or more full intervals late the missed ticks are
/// coalesced into the current one and the cadence resumes from the next
/// boundary after `now`.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    interval: Duration,
    next_deadline: Instant,
}

impl TickSchedule {
    /// Schedule whose first tick is due at `first_deadline`.
    pub fn new(interval: Duration, first_deadline: Instant) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            next_deadline: first_deadline,
        }
    }

    /// Schedule whose first tick is due immediately.
    pub fn starting_now(interval: Duration) -> Self {
        Self::new(interval, Instant::now())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Consume the pending deadline at `now` and advance to the next boundary.
    pub fn on_fire(&mut self, now: Instant) -> TickPlan {
        let deadline = self.next_deadline;
        let lateness = now.saturating_duration_since(deadline);
        let skipped = if lateness >= self.interval {
            u64::try_from(lateness.as_nanos() / self.interval.as_nanos()).unwrap_or(u64::MAX)
        } else {
            0
        };
        let steps = u32::try_from(skipped.saturating_add(1)).unwrap_or(u32::MAX);
        self.next_deadline = deadline + self.interval.saturating_mul(steps);
        TickPlan {
            deadline,
            lateness,
            skipped,
        }
    }

    /// Switch cadence, keeping the phase of the last intended deadline. The
    /// next deadline never lands in the past.
    pub fn set_interval(&mut self, interval: Duration, now: Instant) {
        let interval = interval.max(Duration::from_millis(1));
        let previous = self
            .next_deadline
            .checked_sub(self.interval)
            .unwrap_or(self.next_deadline);
        self.interval = interval;
        self.next_deadline = (previous + interval).max(now);
    }

    /// Excess of tick work over the interval, if any.
    pub fn overrun(&self, started: Instant, finished: Instant) -> Option<Duration> {
        let work = finished.saturating_duration_since(started);
        (work > self.interval).then(|| work - self.interval)
    }

    /// Sleep until the pending deadline.
    pub async fn wait(&self) {
        tokio::time::sleep_until(self.next_deadline).await;
    }
}

/// Interval ticker for housekeeping loops where missed ticks are skipped.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    /// The first tick completes one `period` after creation.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Tracks a set of spawned tasks so they can be joined or aborted together.
#[derive(Debug, Default)]
pub struct TaskGroup {
    name: &'static str,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Vec::new(),
        }
    }

    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(fut));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait up to `grace` for every task, aborting stragglers. Returns the
    /// number of tasks that had to be aborted or panicked.
    pub async fn join(self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let mut failed = 0;
        for mut task in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(group = self.name, error = %err, "task ended abnormally");
                    failed += 1;
                }
                Err(_) => {
                    task.abort();
                    warn!(group = self.name, "task aborted after shutdown grace period");
                    failed += 1;
                }
            }
        }
        failed
    }
}
