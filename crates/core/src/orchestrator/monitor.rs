//! Acquisition monitor: polls the remote client and advances jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{JobService, PeriodicTask};
use crate::error::TrackerError;
use crate::job::{AcquisitionJob, JobFilter, JobStatus, Transition};
use crate::metrics::JOB_TRANSITIONS;
use crate::torrent_client::{
    open_session, with_retry, RemoteSession, RemoteStatus,
};

/// `last_error` for a torrent that stayed absent too long.
pub const VANISHED: &str = "vanished from remote client";

const BATCH: i64 = 500;

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub submitted: usize,
    pub polled: usize,
    pub sync_pending: usize,
    pub failed: usize,
    /// The backend could not be reached; nothing changed.
    pub unreachable: bool,
}

pub struct AcquisitionMonitor {
    service: Arc<JobService>,
    missing_threshold: u32,
}

impl AcquisitionMonitor {
    pub fn new(service: Arc<JobService>, missing_threshold: u32) -> Self {
        Self {
            service,
            missing_threshold,
        }
    }

    /// One polling pass over queued and active jobs, in a single session.
    pub async fn tick(&self) -> Result<MonitorReport, TrackerError> {
        let store = &self.service.store;
        let mut report = MonitorReport::default();

        let queued = store.list(&JobFilter::new().with_status(JobStatus::Queued).with_limit(BATCH))?;
        let mut active =
            store.list(&JobFilter::new().with_status(JobStatus::Downloading).with_limit(BATCH))?;
        active.extend(store.list(&JobFilter::new().with_status(JobStatus::Seeding).with_limit(BATCH))?);
        active.retain(|job| job.correlation_key.is_some());

        if queued.is_empty() && active.is_empty() {
            debug!("Monitor tick: nothing to poll");
            return Ok(report);
        }

        let policy = &self.service.policy;
        let session = match open_session(self.service.client.as_ref(), policy).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Remote client {} unreachable: {}", self.service.client.name(), e);
                report.unreachable = true;
                return Ok(report);
            }
        };

        let result = self.poll(&*session, &queued, &active, &mut report).await;
        session.close().await;
        result?;

        if report.submitted + report.sync_pending + report.failed > 0 {
            info!(
                submitted = report.submitted,
                polled = report.polled,
                sync_pending = report.sync_pending,
                failed = report.failed,
                "Monitor tick finished"
            );
        }
        Ok(report)
    }

    async fn poll(
        &self,
        session: &dyn RemoteSession,
        queued: &[AcquisitionJob],
        active: &[AcquisitionJob],
        report: &mut MonitorReport,
    ) -> Result<(), TrackerError> {
        for job in queued {
            match self.service.submit_on(session, &job.id).await {
                Ok(job) if job.status == JobStatus::Downloading => report.submitted += 1,
                Ok(job) if job.status == JobStatus::Failed => report.failed += 1,
                Ok(_) => {}
                Err(TrackerError::Remote(e)) if e.is_retryable() => {
                    warn!("Remote client unreachable during submission: {}", e);
                    report.unreachable = true;
                    return Ok(());
                }
                Err(e) => warn!("Failed to submit job {}: {}", job.id, e),
            }
        }

        for job in active {
            report.polled += 1;
            match self.poll_job(session, &job.id).await {
                Ok(Some(changed)) => {
                    match changed.status {
                        JobStatus::SyncPending => report.sync_pending += 1,
                        JobStatus::Failed => report.failed += 1,
                        _ => {}
                    }
                    if let Err(e) = self.service.dispatcher.announce(&changed).await {
                        warn!("Failed to queue notification for {}: {}", changed.id, e);
                    }
                }
                Ok(None) => {}
                Err(TrackerError::Remote(e)) if e.is_retryable() => {
                    warn!("Remote client unreachable while polling: {}", e);
                    report.unreachable = true;
                    return Ok(());
                }
                Err(e) => warn!("Failed to poll job {}: {}", job.id, e),
            }
        }
        Ok(())
    }

    /// Read one job's remote status and apply it under the job lock.
    /// Returns the job if it made a user-visible transition.
    async fn poll_job(
        &self,
        session: &dyn RemoteSession,
        job_id: &str,
    ) -> Result<Option<AcquisitionJob>, TrackerError> {
        let store = &self.service.store;
        let _guard = self.service.locks.lock(job_id).await;

        let Some(job) = store.get(job_id)? else {
            return Ok(None);
        };
        if !matches!(job.status, JobStatus::Downloading | JobStatus::Seeding) {
            return Ok(None);
        }
        let Some(key) = job.correlation_key.clone() else {
            return Ok(None);
        };

        let snapshot = with_retry(&self.service.policy, "status", || session.status(&key)).await?;

        match RemoteStatus::from_snapshot(snapshot.as_ref()) {
            RemoteStatus::Absent => {
                let misses = store.record_missing(&job.id)?;
                if misses < self.missing_threshold {
                    debug!(
                        "Job {} missing from remote client ({}/{})",
                        job.id, misses, self.missing_threshold
                    );
                    return Ok(None);
                }
                let failed = store.transition(&job.id, job.status, Transition::failed(VANISHED))?;
                count(JobStatus::Failed);
                warn!(job_id = %job.id, misses, "Torrent vanished from remote client");
                Ok(Some(failed))
            }
            RemoteStatus::Downloading { progress } => {
                store.record_progress(&job.id, progress)?;
                Ok(None)
            }
            RemoteStatus::Seeding => {
                store.record_progress(&job.id, 1.0)?;
                if job.status == JobStatus::Downloading {
                    store.transition(
                        &job.id,
                        JobStatus::Downloading,
                        Transition::to(JobStatus::Seeding),
                    )?;
                    count(JobStatus::Seeding);
                }
                let hint_path = snapshot.as_ref().and_then(|s| s.hint_path());
                let pending = store.transition(
                    &job.id,
                    JobStatus::Seeding,
                    Transition::to(JobStatus::SyncPending).with_hint_path(hint_path),
                )?;
                count(JobStatus::SyncPending);
                info!(
                    job_id = %job.id,
                    hint_path = pending.hint_path.as_deref().unwrap_or(""),
                    "Download complete, waiting for sync"
                );
                Ok(Some(pending))
            }
            RemoteStatus::Errored { message } => {
                let failed =
                    store.transition(&job.id, job.status, Transition::failed(message.clone()))?;
                count(JobStatus::Failed);
                warn!(job_id = %job.id, "Remote client reported an error: {}", message);
                Ok(Some(failed))
            }
        }
    }
}

fn count(to: JobStatus) {
    JOB_TRANSITIONS.with_label_values(&[to.as_str()]).inc();
}

#[async_trait]
impl PeriodicTask for AcquisitionMonitor {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn run_tick(&self) -> Result<(), TrackerError> {
        self.tick().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CreateJobRequest, JobLocks, JobStore, SqliteJobStore};
    use crate::notify::{NotificationDispatcher, SqliteOutbox};
    use crate::testing::{MockNotifier, MockRemoteClient};
    use crate::orchestrator::{GuardedTask, TaskSchedule, TickOutcome};
    use crate::torrent_client::{CallPolicy, TorrentSource};
    use std::time::Duration;

    const HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";

    struct Fixture {
        store: Arc<dyn JobStore>,
        client: Arc<MockRemoteClient>,
        notifier: Arc<MockNotifier>,
        service: Arc<JobService>,
        monitor: AcquisitionMonitor,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let client = Arc::new(MockRemoteClient::new());
        let notifier = Arc::new(MockNotifier::new());
        let locks = JobLocks::new();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(SqliteOutbox::in_memory().unwrap()),
            store.clone(),
            Some(notifier.clone()),
            locks.clone(),
        ));
        let service = Arc::new(JobService::new(
            store.clone(),
            client.clone(),
            dispatcher,
            locks,
            CallPolicy::immediate(Duration::from_secs(1)),
        ));
        let monitor = AcquisitionMonitor::new(service.clone(), 3);
        Fixture {
            store,
            client,
            notifier,
            service,
            monitor,
        }
    }

    async fn downloading(f: &Fixture) -> AcquisitionJob {
        let job = f
            .service
            .request_download(CreateJobRequest {
                display_name: "Arrival".to_string(),
                source: TorrentSource::magnet(format!("magnet:?xt=urn:btih:{HASH}&dn=Arrival")),
                owner: "42".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        job
    }

    #[tokio::test]
    async fn test_progress_is_recorded_without_transition() {
        let f = fixture();
        let job = downloading(&f).await;
        f.client.set_progress(HASH, 0.4);

        let report = f.monitor.tick().await.unwrap();
        assert_eq!(report.polled, 1);
        let stored = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Downloading);
        assert!((stored.progress - 0.4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_seeding_moves_to_sync_pending_and_notifies() {
        let f = fixture();
        let job = downloading(&f).await;
        f.client.set_progress(HASH, 1.0);

        let report = f.monitor.tick().await.unwrap();
        assert_eq!(report.sync_pending, 1);
        let stored = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::SyncPending);
        assert_eq!(stored.hint_path.as_deref(), Some("/downloads/Arrival"));

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("Downloaded to the seedbox: Arrival"));
    }

    #[tokio::test]
    async fn test_vanished_after_threshold_fails_once() {
        let f = fixture();
        let job = downloading(&f).await;
        f.client.vanish(HASH);

        for _ in 0..2 {
            f.monitor.tick().await.unwrap();
            assert_eq!(
                f.store.get(&job.id).unwrap().unwrap().status,
                JobStatus::Downloading
            );
        }
        let report = f.monitor.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        let stored = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some(VANISHED));

        // Failed jobs are no longer polled.
        let report = f.monitor.tick().await.unwrap();
        assert_eq!(report.polled, 0);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_progress_resets_missing_counter() {
        let f = fixture();
        let job = downloading(&f).await;

        f.client.vanish(HASH);
        f.monitor.tick().await.unwrap();
        f.monitor.tick().await.unwrap();
        f.client.set_progress(HASH, 0.5);
        f.monitor.tick().await.unwrap();
        assert_eq!(f.store.get(&job.id).unwrap().unwrap().missing_polls, 0);

        f.client.vanish(HASH);
        f.monitor.tick().await.unwrap();
        assert_eq!(
            f.store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Downloading
        );
    }

    #[tokio::test]
    async fn test_backend_error_fails_job() {
        let f = fixture();
        let job = downloading(&f).await;
        f.client.set_error(HASH, "No space left on device");

        f.monitor.tick().await.unwrap();
        let stored = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("No space left on device"));
    }

    #[tokio::test]
    async fn test_unreachable_changes_nothing() {
        let f = fixture();
        let job = downloading(&f).await;
        let before = f.store.get(&job.id).unwrap().unwrap();
        f.client.set_unreachable(true);

        let report = f.monitor.tick().await.unwrap();
        assert!(report.unreachable);
        let after = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Downloading);
        assert_eq!(after.status_updated_at, before.status_updated_at);
        assert_eq!(after.missing_polls, 0);
    }

    #[tokio::test]
    async fn test_queued_job_submitted_when_backend_returns() {
        let f = fixture();
        f.client.set_unreachable(true);
        let job = f
            .service
            .request_download(CreateJobRequest {
                display_name: "Arrival".to_string(),
                source: TorrentSource::magnet(format!("magnet:?xt=urn:btih:{HASH}&dn=Arrival")),
                owner: "42".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        f.client.set_unreachable(false);
        let report = f.monitor.tick().await.unwrap();
        assert_eq!(report.submitted, 1);
        let stored = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Downloading);
        assert_eq!(stored.correlation_key.as_deref(), Some(HASH));
    }

    #[tokio::test]
    async fn test_session_closed_every_tick() {
        let f = fixture();
        downloading(&f).await;
        let closes = f.client.closes();
        f.monitor.tick().await.unwrap();
        f.monitor.tick().await.unwrap();
        assert_eq!(f.client.closes(), closes + 2);
    }

    #[tokio::test]
    async fn test_tick_cut_off_by_deadline_still_closes_session() {
        let f = fixture();
        downloading(&f).await;
        f.client.delay_status(Duration::from_millis(400));

        let guarded = GuardedTask::new(
            Arc::new(AcquisitionMonitor::new(f.service.clone(), 3)),
            TaskSchedule::new(Duration::from_secs(60), Duration::from_millis(100)),
        );
        assert_eq!(guarded.run_now().await, TickOutcome::TimedOut);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.client.connects(), 2);
        assert_eq!(f.client.closes(), 2);
        let job = f.store.list(&JobFilter::new()).unwrap().remove(0);
        assert_eq!(job.status, JobStatus::Downloading);
    }
}
