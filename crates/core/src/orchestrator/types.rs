//! Types for periodic tasks.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TrackerError;

/// One unit of periodic work.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_tick(&self) -> Result<(), TrackerError>;
}

/// How often a task runs and how long one tick may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSchedule {
    pub interval: Duration,
    pub deadline: Duration,
}

impl TaskSchedule {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    pub fn from_secs(interval_secs: u64, deadline_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(deadline_secs),
        )
    }
}

/// What happened to one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    Failed,
    TimedOut,
    /// The previous tick was still running.
    Skipped,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Completed => "completed",
            TickOutcome::Failed => "failed",
            TickOutcome::TimedOut => "timed_out",
            TickOutcome::Skipped => "skipped",
        }
    }
}
