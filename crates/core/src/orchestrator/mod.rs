//! Background work that drives jobs forward.
//!
//! Each periodic task runs independently on its own interval:
//! - **Monitor**: polls the remote client and advances downloads
//! - **Notification sweep**: redelivers queued notifications
//! - **Retention**: retires finished jobs
//!
//! A task never overlaps itself; a tick still running when the next is
//! due causes that next tick to be skipped.

mod intake;
mod monitor;
mod notification_sweep;
mod retention;
mod runner;
mod types;

pub use intake::JobService;
pub use monitor::{AcquisitionMonitor, MonitorReport, VANISHED};
pub use notification_sweep::NotificationSweep;
pub use retention::{RetentionReport, RetentionSweep};
pub use runner::{GuardedTask, Scheduler};
pub use types::{PeriodicTask, TaskSchedule, TickOutcome};
