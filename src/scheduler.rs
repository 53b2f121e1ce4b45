//! # Sample Scheduler
//!
//! Two-state timer: **Stopped** → `enable(period_hz)` → **Running** →
//! `disable()` → **Stopped**. While running, `next_tick` completes every
//! `1000 / period_hz` milliseconds; while stopped it never completes, so it
//! can sit in a `tokio::select!` next to the command channel.

use crate::config::{MAX_PERIOD_HZ, MIN_PERIOD_HZ};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running { period_hz: u32 },
}

/// Tick spacing for a sampling rate in Hz
pub fn tick_interval(period_hz: u32) -> Duration {
    Duration::from_secs(1) / period_hz.clamp(MIN_PERIOD_HZ, MAX_PERIOD_HZ)
}

pub struct SampleScheduler {
    state: SchedulerState,
    timer: Option<Interval>,
}

impl Default for SampleScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleScheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Stopped,
            timer: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SchedulerState::Running { .. })
    }

    pub fn interval(&self) -> Option<Duration> {
        match self.state {
            SchedulerState::Running { period_hz } => Some(tick_interval(period_hz)),
            SchedulerState::Stopped => None,
        }
    }

    /// Start ticking at `period_hz`. The first tick fires one interval from now.
    /// The timer itself is created lazily on the first `next_tick` so the
    /// scheduler can be driven outside a runtime.
    pub fn enable(&mut self, period_hz: u32) {
        let period_hz = period_hz.clamp(MIN_PERIOD_HZ, MAX_PERIOD_HZ);
        self.state = SchedulerState::Running { period_hz };
        self.timer = None;
        log::debug!("Scheduler running every {:?}", tick_interval(period_hz));
    }

    pub fn disable(&mut self) {
        if self.is_running() {
            log::debug!("Scheduler stopped");
        }
        self.state = SchedulerState::Stopped;
        self.timer = None;
    }

    /// Wait for the next tick; pending forever while stopped
    pub async fn next_tick(&mut self) {
        let period = match self.interval() {
            Some(period) => period,
            None => return std::future::pending().await,
        };

        let timer = self.timer.get_or_insert_with(|| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });
        timer.tick().await;
    }
}
