use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::torrent_client::TorrentSource;

/// Lifecycle position of a job.
///
/// The happy path is a strict chain:
/// `queued -> downloading -> seeding -> sync_pending -> synced -> notified`.
/// `failed` is reachable once from any state before `synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Seeding,
    SyncPending,
    Synced,
    Notified,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Downloading,
        JobStatus::Seeding,
        JobStatus::SyncPending,
        JobStatus::Synced,
        JobStatus::Notified,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Seeding => "seeding",
            JobStatus::SyncPending => "sync_pending",
            JobStatus::Synced => "synced",
            JobStatus::Notified => "notified",
            JobStatus::Failed => "failed",
        }
    }

    /// The single successor on the happy path.
    pub fn next(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Queued => Some(JobStatus::Downloading),
            JobStatus::Downloading => Some(JobStatus::Seeding),
            JobStatus::Seeding => Some(JobStatus::SyncPending),
            JobStatus::SyncPending => Some(JobStatus::Synced),
            JobStatus::Synced => Some(JobStatus::Notified),
            JobStatus::Notified | JobStatus::Failed => None,
        }
    }

    /// Whether a job in this status may still fail.
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Downloading | JobStatus::Seeding | JobStatus::SyncPending
        )
    }

    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        if to == JobStatus::Failed {
            return self.can_fail();
        }
        self.next() == Some(to)
    }

    /// No further transitions; eligible for retention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Notified | JobStatus::Failed)
    }

    /// Still occupying a slot for its (owner, title): a new request for the
    /// same title is a duplicate.
    pub fn is_active(&self) -> bool {
        self.can_fail()
    }

    /// Entering this status produces a message for the owner.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            JobStatus::SyncPending | JobStatus::Synced | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// One download request and everything observed about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionJob {
    pub id: String,
    /// Backend info hash, lower-case hex. Set once, before `downloading`.
    pub correlation_key: Option<String>,
    pub display_name: String,
    pub owner: String,
    pub status: JobStatus,
    pub source: TorrentSource,
    /// Last observed progress in `0.0..=1.0`.
    pub progress: f64,
    /// Consecutive monitor ticks that found the torrent missing.
    pub missing_polls: u32,
    /// Where the backend keeps the payload; served to the sync agent.
    pub hint_path: Option<String>,
    /// Where the agent put the payload.
    pub destination_path: Option<String>,
    /// Only set in `failed`.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status_updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_a_strict_chain() {
        let mut status = JobStatus::Queued;
        let mut seen = vec![status];
        while let Some(next) = status.next() {
            assert!(status.can_transition_to(next));
            status = next;
            seen.push(status);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(status, JobStatus::Notified);
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Seeding));
        assert!(!JobStatus::Downloading.can_transition_to(JobStatus::SyncPending));
        assert!(!JobStatus::Seeding.can_transition_to(JobStatus::Downloading));
        assert!(!JobStatus::Synced.can_transition_to(JobStatus::SyncPending));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_failed_reachable_only_before_synced() {
        for status in JobStatus::ALL {
            let expected = matches!(
                status,
                JobStatus::Queued
                    | JobStatus::Downloading
                    | JobStatus::Seeding
                    | JobStatus::SyncPending
            );
            assert_eq!(status.can_transition_to(JobStatus::Failed), expected, "{status}");
        }
    }

    #[test]
    fn test_terminal_states_have_no_successor() {
        for status in [JobStatus::Notified, JobStatus::Failed] {
            assert!(status.is_terminal());
            assert!(JobStatus::ALL.iter().all(|to| !status.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_status_string_roundtrip_and_unknown() {
        assert_eq!("sync_pending".parse::<JobStatus>(), Ok(JobStatus::SyncPending));
        assert_eq!(JobStatus::SyncPending.to_string(), "sync_pending");
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_user_visible_statuses() {
        let visible: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_user_visible)
            .collect();
        assert_eq!(
            visible,
            vec![JobStatus::SyncPending, JobStatus::Synced, JobStatus::Failed]
        );
    }
}
