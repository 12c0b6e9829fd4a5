//! The sync agent contract: pending work served on request, completion
//! reports reconciled back to jobs.

mod bridge;
mod report_log;
mod resolver;

pub use bridge::{CompletionOutcome, PendingItem, PendingWork, SyncBridge};
pub use report_log::{ReportLog, ReportRecord, SqliteReportLog};
pub use resolver::{
    normalize_title, resolve, strip_file_count, CompletionReport, MatchKind, Resolution,
};
