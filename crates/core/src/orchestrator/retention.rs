//! Retention sweep: removes finished jobs and their backend entries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::{JobService, PeriodicTask};
use crate::error::TrackerError;
use crate::job::AcquisitionJob;
use crate::metrics::JOBS_RETIRED;
use crate::notify::NotificationOutbox;
use crate::sync::ReportLog;
use crate::torrent_client::{open_session, with_retry, RemoteSession};

const BATCH: i64 = 200;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub retired: usize,
    /// Kept because the backend entry could not be confirmed gone.
    pub kept: usize,
}

/// Deletes `notified` and `failed` jobs older than the retention window.
///
/// A job with a correlation key is deleted only after the backend confirms
/// the torrent is gone; otherwise it is retried on the next sweep.
pub struct RetentionSweep {
    service: Arc<JobService>,
    outbox: Arc<dyn NotificationOutbox>,
    reports: Arc<dyn ReportLog>,
    retention: Duration,
    delete_data: bool,
}

impl RetentionSweep {
    pub fn new(
        service: Arc<JobService>,
        outbox: Arc<dyn NotificationOutbox>,
        reports: Arc<dyn ReportLog>,
        retention_days: u32,
        delete_data: bool,
    ) -> Self {
        Self {
            service,
            outbox,
            reports,
            retention: Duration::days(i64::from(retention_days)),
            delete_data,
        }
    }

    pub async fn sweep(&self) -> Result<RetentionReport, TrackerError> {
        let store = &self.service.store;
        let mut report = RetentionReport::default();

        let cutoff = Utc::now() - self.retention;
        let candidates = store.list_retirable(cutoff, BATCH)?;
        if candidates.is_empty() {
            return Ok(report);
        }

        let (keyed, keyless): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|job| job.correlation_key.is_some());

        for job in &keyless {
            self.retire(job).await?;
            report.retired += 1;
        }
        if keyed.is_empty() {
            return Ok(report);
        }

        let policy = &self.service.policy;
        let session = match open_session(self.service.client.as_ref(), policy).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Retention skipped {} jobs, remote client unreachable: {}", keyed.len(), e);
                report.kept += keyed.len();
                return Ok(report);
            }
        };
        let result = self.retire_keyed(&*session, &keyed, &mut report).await;
        session.close().await;
        result?;

        if report.retired > 0 || report.kept > 0 {
            info!(
                retired = report.retired,
                kept = report.kept,
                "Retention sweep finished"
            );
        }
        Ok(report)
    }

    async fn retire_keyed(
        &self,
        session: &dyn RemoteSession,
        jobs: &[AcquisitionJob],
        report: &mut RetentionReport,
    ) -> Result<(), TrackerError> {
        let policy = &self.service.policy;
        for job in jobs {
            let Some(key) = job.correlation_key.as_deref() else {
                continue;
            };
            let removed = with_retry(policy, "remove", || session.remove(key, self.delete_data)).await;
            let gone = match removed {
                Ok(true) => true,
                // Not there: confirm before forgetting about it.
                Ok(false) => match with_retry(policy, "status", || session.status(key)).await {
                    Ok(snapshot) => snapshot.is_none(),
                    Err(e) => {
                        debug!("Could not confirm removal of {}: {}", key, e);
                        false
                    }
                },
                Err(e) => {
                    warn!("Failed to remove torrent {} for job {}: {}", key, job.id, e);
                    false
                }
            };

            if gone {
                self.retire(job).await?;
                report.retired += 1;
            } else {
                report.kept += 1;
            }
        }
        Ok(())
    }

    async fn retire(&self, job: &AcquisitionJob) -> Result<(), TrackerError> {
        let _guard = self.service.locks.lock(&job.id).await;
        self.service.store.delete(&job.id)?;
        self.outbox.delete_for_job(&job.id)?;
        self.reports.purge_job(&job.id)?;
        JOBS_RETIRED.inc();
        debug!("Retired job {} ({})", job.id, job.status);
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for RetentionSweep {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn run_tick(&self) -> Result<(), TrackerError> {
        self.sweep().await.map(|_| ())
    }
}
