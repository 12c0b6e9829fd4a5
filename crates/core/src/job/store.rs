//! Job storage trait and request types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{AcquisitionJob, JobStatus};
use crate::torrent_client::TorrentSource;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    /// The status machine does not allow this move at all.
    #[error("job {job_id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Compare-and-set lost: somebody else moved the job first.
    #[error("job {job_id} is {actual}, expected {expected}")]
    StatusMismatch {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("an active request for '{display_name}' already exists (job {existing_id})")]
    Duplicate {
        display_name: String,
        existing_id: String,
    },

    #[error("job {job_id} already has correlation key {existing}")]
    KeyAlreadySet { job_id: String, existing: String },

    #[error("job {0} has no correlation key")]
    MissingCorrelationKey(String),

    #[error("invalid job request: {0}")]
    InvalidRequest(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub display_name: String,
    pub source: TorrentSource,
    pub owner: String,
}

/// A status change together with the fields that change with it.
#[derive(Debug, Clone)]
pub struct Transition {
    pub to: JobStatus,
    pub last_error: Option<String>,
    pub hint_path: Option<String>,
    pub destination_path: Option<String>,
}

impl Transition {
    pub fn to(status: JobStatus) -> Self {
        Self {
            to: status,
            last_error: None,
            hint_path: None,
            destination_path: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..Self::to(JobStatus::Failed)
        }
    }

    pub fn with_hint_path(mut self, hint_path: Option<String>) -> Self {
        self.hint_path = hint_path;
        self
    }

    pub fn with_destination_path(mut self, destination_path: impl Into<String>) -> Self {
        self.destination_path = Some(destination_path.into());
        self
    }
}

/// Filter for querying jobs. Results are newest status change first.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub owner: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            owner: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable job table.
///
/// Methods are synchronous and short; each one is atomic with respect to
/// the others. Callers that read-decide-write hold the job's
/// [`JobLocks`](super::JobLocks) guard around the sequence.
pub trait JobStore: Send + Sync {
    /// Create a job in `queued`. Rejects a second active job with the same
    /// owner and case-folded display name.
    fn create(&self, request: CreateJobRequest) -> Result<AcquisitionJob, JobError>;

    fn get(&self, id: &str) -> Result<Option<AcquisitionJob>, JobError>;

    fn list(&self, filter: &JobFilter) -> Result<Vec<AcquisitionJob>, JobError>;

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Jobs in `status` whose display name equals `display_name`
    /// case-insensitively.
    fn find_by_display_name(
        &self,
        status: JobStatus,
        display_name: &str,
    ) -> Result<Vec<AcquisitionJob>, JobError>;

    /// Set the correlation key. Fails if a different key is already set.
    fn attach_correlation_key(&self, id: &str, key: &str) -> Result<AcquisitionJob, JobError>;

    /// Compare-and-set status change: applies only if the job is still in
    /// `from`. Stamps `status_updated_at` strictly after the previous stamp.
    fn transition(
        &self,
        id: &str,
        from: JobStatus,
        transition: Transition,
    ) -> Result<AcquisitionJob, JobError>;

    /// Record observed progress and clear the missing-poll counter.
    fn record_progress(&self, id: &str, progress: f64) -> Result<(), JobError>;

    /// Count one more tick where the torrent was absent; returns the new
    /// consecutive count.
    fn record_missing(&self, id: &str) -> Result<u32, JobError>;

    /// Terminal jobs whose last status change is older than `cutoff`.
    fn list_retirable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AcquisitionJob>, JobError>;

    /// Permanently delete a job. Returns the deleted job.
    fn delete(&self, id: &str) -> Result<AcquisitionJob, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_builder() {
        let filter = JobFilter::new()
            .with_status(JobStatus::SyncPending)
            .with_owner("42")
            .with_limit(10)
            .with_offset(5);
        assert_eq!(filter.status, Some(JobStatus::SyncPending));
        assert_eq!(filter.owner.as_deref(), Some("42"));
        assert_eq!((filter.limit, filter.offset), (10, 5));
    }

    #[test]
    fn test_failed_transition_carries_error() {
        let t = Transition::failed("vanished from remote client");
        assert_eq!(t.to, JobStatus::Failed);
        assert_eq!(t.last_error.as_deref(), Some("vanished from remote client"));
    }
}
