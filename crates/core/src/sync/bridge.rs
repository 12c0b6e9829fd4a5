//! Server side of the sync agent protocol.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{resolve, CompletionReport, ReportLog};
use crate::config::SyncConfig;
use crate::error::TrackerError;
use crate::job::{JobError, JobFilter, JobLocks, JobStatus, JobStore, Transition};
use crate::metrics::{JOB_TRANSITIONS, RECONCILIATIONS};
use crate::notify::NotificationDispatcher;

/// One entry the agent should copy home.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingItem {
    pub display_name: String,
    pub hint_path: Option<String>,
}

/// Answer to `GET /sync/pending`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingWork {
    pub sync_needed: bool,
    pub items: Vec<PendingItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The report moved this job to `synced`.
    Synced { job_id: String },
    /// Seen before; nothing changed.
    AlreadyApplied { job_id: String },
    /// No job matched. `permanent` once the agent has retried past the
    /// warning threshold.
    Unresolved { attempts: u32, permanent: bool },
}

pub struct SyncBridge {
    store: Arc<dyn JobStore>,
    reports: Arc<dyn ReportLog>,
    dispatcher: Arc<NotificationDispatcher>,
    locks: JobLocks,
    config: SyncConfig,
}

impl SyncBridge {
    pub fn new(
        store: Arc<dyn JobStore>,
        reports: Arc<dyn ReportLog>,
        dispatcher: Arc<NotificationDispatcher>,
        locks: JobLocks,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            reports,
            dispatcher,
            locks,
            config,
        }
    }

    fn pending_jobs(&self) -> Result<Vec<crate::job::AcquisitionJob>, JobError> {
        self.store.list(
            &JobFilter::new()
                .with_status(JobStatus::SyncPending)
                .with_limit(self.config.max_pending_scan as i64),
        )
    }

    /// Work derived from current state; polling has no side effects.
    pub fn pending_work(&self) -> Result<PendingWork, TrackerError> {
        let items: Vec<PendingItem> = self
            .pending_jobs()?
            .into_iter()
            .map(|job| PendingItem {
                display_name: job.display_name,
                hint_path: job.hint_path,
            })
            .collect();
        Ok(PendingWork {
            sync_needed: !items.is_empty(),
            items,
        })
    }

    /// Apply a completion report from the agent.
    pub async fn complete(
        &self,
        report: CompletionReport,
    ) -> Result<CompletionOutcome, TrackerError> {
        if report.filename.trim().is_empty() {
            return Err(TrackerError::InvalidReport("filename is empty".to_string()));
        }
        if report.local_path.trim().is_empty() {
            return Err(TrackerError::InvalidReport("local_path is empty".to_string()));
        }

        if let Some(applied) = self.replayed(&report).await? {
            RECONCILIATIONS.with_label_values(&["replay"]).inc();
            return Ok(applied);
        }

        let candidates = self.pending_jobs()?;
        let Some(resolution) = resolve(&report, &candidates) else {
            return self.unresolved(&report);
        };

        let synced = {
            let _guard = self.locks.lock(&resolution.job_id).await;
            let result = self.store.transition(
                &resolution.job_id,
                JobStatus::SyncPending,
                Transition::to(JobStatus::Synced).with_destination_path(&report.local_path),
            );
            match result {
                Ok(job) => {
                    // The job is synced either way; a missing log row only
                    // costs replay detection for this report.
                    if let Err(e) =
                        self.reports
                            .record_resolved(&report.filename, &report.local_path, &job.id)
                    {
                        warn!("Failed to log completion report for {}: {}", job.id, e);
                    }
                    job
                }
                // Moved on between the scan and the lock (failed, or another
                // report won): treat like no match.
                Err(JobError::StatusMismatch { .. }) | Err(JobError::NotFound(_)) => {
                    debug!(
                        "Job {} left sync_pending before report '{}' was applied",
                        resolution.job_id, report.filename
                    );
                    return self.unresolved(&report);
                }
                Err(e) => return Err(e.into()),
            }
        };

        JOB_TRANSITIONS
            .with_label_values(&[JobStatus::Synced.as_str()])
            .inc();
        RECONCILIATIONS
            .with_label_values(&[resolution.kind.as_str()])
            .inc();
        info!(
            job_id = %synced.id,
            matched_by = resolution.kind.as_str(),
            destination = %report.local_path,
            "Completion report '{}' applied",
            report.filename
        );

        if let Err(e) = self.dispatcher.announce(&synced).await {
            warn!("Failed to queue synced notification for {}: {}", synced.id, e);
        }

        Ok(CompletionOutcome::Synced { job_id: synced.id })
    }

    /// A report already applied to a job. Only the exact
    /// `(filename, local_path)` pair counts: several jobs may share one
    /// destination folder.
    async fn replayed(
        &self,
        report: &CompletionReport,
    ) -> Result<Option<CompletionOutcome>, TrackerError> {
        let Some(job_id) = self
            .reports
            .lookup(&report.filename, &report.local_path)?
            .and_then(|record| record.job_id)
        else {
            return Ok(None);
        };

        debug!("Replayed completion report '{}' for job {}", report.filename, job_id);
        // Finish a delivery that an earlier attempt left pending.
        if let Err(e) = self.dispatcher.dispatch(&job_id, JobStatus::Synced).await {
            warn!("Failed to redispatch synced notification for {}: {}", job_id, e);
        }
        Ok(Some(CompletionOutcome::AlreadyApplied { job_id }))
    }

    fn unresolved(&self, report: &CompletionReport) -> Result<CompletionOutcome, TrackerError> {
        let attempts = self
            .reports
            .record_unresolved(&report.filename, &report.local_path)?;
        let permanent = attempts >= self.config.unresolved_warn_after;
        RECONCILIATIONS.with_label_values(&["unresolved"]).inc();
        if permanent {
            warn!(
                filename = %report.filename,
                local_path = %report.local_path,
                attempts,
                "Completion report permanently unresolved"
            );
        } else {
            info!(
                "No sync_pending job matches '{}' (attempt {})",
                report.filename, attempts
            );
        }
        Ok(CompletionOutcome::Unresolved {
            attempts,
            permanent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AcquisitionJob, CreateJobRequest, SqliteJobStore};
    use crate::notify::SqliteOutbox;
    use crate::sync::SqliteReportLog;
    use crate::testing::MockNotifier;
    use crate::torrent_client::TorrentSource;

    struct Fixture {
        store: Arc<SqliteJobStore>,
        notifier: Arc<MockNotifier>,
        bridge: SyncBridge,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let notifier = Arc::new(MockNotifier::new());
        let locks = JobLocks::new();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(SqliteOutbox::in_memory().unwrap()),
            store.clone(),
            Some(notifier.clone()),
            locks.clone(),
        ));
        let bridge = SyncBridge::new(
            store.clone(),
            Arc::new(SqliteReportLog::in_memory().unwrap()),
            dispatcher,
            locks,
            SyncConfig::default(),
        );
        Fixture {
            store,
            notifier,
            bridge,
        }
    }

    fn pending_job(store: &SqliteJobStore, title: &str, key: &str) -> AcquisitionJob {
        let job = store
            .create(CreateJobRequest {
                display_name: title.to_string(),
                source: TorrentSource::magnet(format!("magnet:?xt=urn:btih:{key}")),
                owner: "42".to_string(),
            })
            .unwrap();
        store.attach_correlation_key(&job.id, key).unwrap();
        store
            .transition(&job.id, JobStatus::Queued, Transition::to(JobStatus::Downloading))
            .unwrap();
        store
            .transition(&job.id, JobStatus::Downloading, Transition::to(JobStatus::Seeding))
            .unwrap();
        store
            .transition(
                &job.id,
                JobStatus::Seeding,
                Transition::to(JobStatus::SyncPending)
                    .with_hint_path(Some(format!("/downloads/{title}"))),
            )
            .unwrap()
    }

    #[test]
    fn test_pending_work_reflects_state() {
        let f = fixture();
        let empty = f.bridge.pending_work().unwrap();
        assert!(!empty.sync_needed);
        assert!(empty.items.is_empty());

        pending_job(&f.store, "Arrival", "aaaa");
        let work = f.bridge.pending_work().unwrap();
        assert!(work.sync_needed);
        assert_eq!(work.items[0].display_name, "Arrival");
        assert_eq!(work.items[0].hint_path.as_deref(), Some("/downloads/Arrival"));

        // Polling again changes nothing.
        assert_eq!(f.bridge.pending_work().unwrap(), work);
    }

    #[tokio::test]
    async fn test_complete_syncs_and_notifies() {
        let f = fixture();
        let job = pending_job(&f.store, "Arrival", "aaaa");

        let outcome = f
            .bridge
            .complete(CompletionReport::new("Arrival", "/media/Movies/Arrival"))
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::Synced { job_id: job.id.clone() });

        let stored = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Notified);
        assert_eq!(stored.destination_path.as_deref(), Some("/media/Movies/Arrival"));
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_replayed_report_is_a_noop() {
        let f = fixture();
        let job = pending_job(&f.store, "Arrival", "aaaa");
        let report = CompletionReport::new("Arrival", "/media/Movies/Arrival");

        f.bridge.complete(report.clone()).await.unwrap();
        let before = f.store.get(&job.id).unwrap().unwrap();
        let again = f.bridge.complete(report).await.unwrap();

        assert_eq!(again, CompletionOutcome::AlreadyApplied { job_id: job.id.clone() });
        let after = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(after.status_updated_at, before.status_updated_at);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_episodes_sharing_a_folder_both_sync() {
        let f = fixture();
        let e05 = pending_job(&f.store, "Severance S02E05", "e05e05");
        let e06 = pending_job(&f.store, "Severance S02E06", "e06e06");

        let first = f
            .bridge
            .complete(CompletionReport::new("Severance S02E05", "/tv/Severance S02"))
            .await
            .unwrap();
        assert_eq!(first, CompletionOutcome::Synced { job_id: e05.id.clone() });

        let second = f
            .bridge
            .complete(CompletionReport::new("Severance S02E06", "/tv/Severance S02"))
            .await
            .unwrap();
        assert_eq!(second, CompletionOutcome::Synced { job_id: e06.id.clone() });

        for id in [&e05.id, &e06.id] {
            let stored = f.store.get(id).unwrap().unwrap();
            assert_eq!(stored.status, JobStatus::Notified);
            assert_eq!(stored.destination_path.as_deref(), Some("/tv/Severance S02"));
        }
        assert!(!f.bridge.pending_work().unwrap().sync_needed);
        assert_eq!(f.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_unresolved_counts_attempts_and_goes_permanent() {
        let f = fixture();
        let bystander = pending_job(&f.store, "Arrival", "aaaa");
        let report = CompletionReport::new("Completely Unrelated", "/media/x");

        for expected in 1..=3u32 {
            let outcome = f.bridge.complete(report.clone()).await.unwrap();
            assert_eq!(
                outcome,
                CompletionOutcome::Unresolved {
                    attempts: expected,
                    permanent: expected >= 3
                }
            );
        }
        assert_eq!(
            f.store.get(&bystander.id).unwrap().unwrap().status,
            JobStatus::SyncPending
        );
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_filename_is_invalid() {
        let f = fixture();
        let result = f.bridge.complete(CompletionReport::new("  ", "/media/x")).await;
        assert!(matches!(result, Err(TrackerError::InvalidReport(_))));
    }
}
