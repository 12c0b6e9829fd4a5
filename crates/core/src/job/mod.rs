//! Acquisition jobs: the durable record of one download request from
//! intake to final notification.

mod locks;
mod sqlite_store;
mod store;
mod types;

pub use locks::JobLocks;
pub use sqlite_store::SqliteJobStore;
pub use store::{CreateJobRequest, JobError, JobFilter, JobStore, Transition};
pub use types::{AcquisitionJob, JobStatus, UnknownStatus};
