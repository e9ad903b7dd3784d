// cartos_core/src/engine/scheduler.rs

use crate::config::UNBOUNDED_PUBLISH_PERIOD;
use std::time::{Duration, Instant};

/// Wall-clock publish cadence. The deadline never moves backwards.
#[derive(Debug, Clone)]
pub struct PublishScheduler {
    period: Duration,
    deadline: Instant,
    cycles: u64,
}

impl PublishScheduler {
    /// The first cycle is due one period after `now`.
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            deadline: Self::advance(now, period, now),
            cycles: 0,
        }
    }

    fn advance(now: Instant, period: Duration, fallback: Instant) -> Instant {
        now.checked_add(period)
            .or_else(|| now.checked_add(UNBOUNDED_PUBLISH_PERIOD))
            .unwrap_or(fallback)
            .max(fallback)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// How long the worker may sleep: the time left to the deadline, never
    /// more than one period.
    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now).min(self.period)
    }

    /// Records a publish cycle at `now` and moves the deadline to
    /// `now + period`.
    pub fn mark_published(&mut self, now: Instant) {
        self.deadline = Self::advance(now, self.period, self.deadline);
        self.cycles += 1;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
