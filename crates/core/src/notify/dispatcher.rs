//! Outbox-driven notification delivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::{message_for, Delivery, DeliveryState, NotificationOutbox, Notifier, NotifyError};
use crate::job::{AcquisitionJob, JobError, JobFilter, JobLocks, JobStatus, JobStore, Transition};
use crate::metrics::{JOB_TRANSITIONS, NOTIFICATIONS};

/// Concurrent sends per retry sweep.
const SWEEP_CONCURRENCY: usize = 4;
const SWEEP_BATCH: usize = 100;

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Sender unavailable or not configured; the row stays pending.
    Deferred,
    /// Rejected by the messaging service; never retried.
    Failed,
    /// Nothing to send: already delivered, failed, or in flight elsewhere.
    Skipped,
}

/// Counters for one retry sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub delivered: usize,
    pub deferred: usize,
    pub failed: usize,
    pub finalized: usize,
}

/// Sends queued notifications and finishes jobs once the synced message
/// has been dealt with.
///
/// Holds the job lock only around the final `synced -> notified` step, so
/// callers must not hold the same job's lock when calling in.
pub struct NotificationDispatcher {
    outbox: Arc<dyn NotificationOutbox>,
    store: Arc<dyn JobStore>,
    notifier: Option<Arc<dyn Notifier>>,
    locks: JobLocks,
}

impl NotificationDispatcher {
    pub fn new(
        outbox: Arc<dyn NotificationOutbox>,
        store: Arc<dyn JobStore>,
        notifier: Option<Arc<dyn Notifier>>,
        locks: JobLocks,
    ) -> Self {
        if notifier.is_none() {
            warn!("No notifier configured; notifications will stay queued");
        }
        Self {
            outbox,
            store,
            notifier,
            locks,
        }
    }

    pub fn outbox(&self) -> &Arc<dyn NotificationOutbox> {
        &self.outbox
    }

    /// Queue the message for the transition `job` just made and try to send
    /// it. Replays of the same transition are absorbed by the outbox.
    pub async fn announce(&self, job: &AcquisitionJob) -> Result<DispatchOutcome, NotifyError> {
        let Some(text) = message_for(job) else {
            return Ok(DispatchOutcome::Skipped);
        };
        let queued = self
            .outbox
            .enqueue(&job.id, job.status, &job.owner, &text)?;
        if !queued {
            debug!("Notification for job {} ({}) already queued", job.id, job.status);
        }
        self.dispatch(&job.id, job.status).await
    }

    /// Try to deliver the `(job_id, status)` message once.
    pub async fn dispatch(
        &self,
        job_id: &str,
        status: JobStatus,
    ) -> Result<DispatchOutcome, NotifyError> {
        let Some(notification) = self.outbox.claim(job_id, status)? else {
            // Covers a crash between settling the row and finishing the job.
            if status == JobStatus::Synced {
                if let Some(row) = self.outbox.get(job_id, status)? {
                    if row.state.is_final() {
                        self.finish_job(job_id).await;
                    }
                }
            }
            return Ok(DispatchOutcome::Skipped);
        };

        let Some(notifier) = &self.notifier else {
            self.outbox
                .settle(job_id, status, DeliveryState::Pending, None)?;
            NOTIFICATIONS.with_label_values(&["deferred"]).inc();
            return Ok(DispatchOutcome::Deferred);
        };

        let outcome = match notifier
            .notify(&notification.owner, &notification.text)
            .await
        {
            Ok(Delivery::Delivered) => {
                self.outbox
                    .settle(job_id, status, DeliveryState::Delivered, None)?;
                info!(
                    job_id = %job_id,
                    status = %status,
                    attempts = notification.attempts,
                    "Notification delivered via {}",
                    notifier.name()
                );
                DispatchOutcome::Delivered
            }
            Ok(Delivery::Unavailable) => {
                self.outbox.settle(
                    job_id,
                    status,
                    DeliveryState::Pending,
                    Some("notifier unavailable"),
                )?;
                debug!(
                    "Notifier {} unavailable for job {} ({}), will retry",
                    notifier.name(),
                    job_id,
                    status
                );
                DispatchOutcome::Deferred
            }
            Err(e) => {
                let message = e.to_string();
                self.outbox
                    .settle(job_id, status, DeliveryState::Failed, Some(&message))?;
                warn!(
                    job_id = %job_id,
                    status = %status,
                    "Notification permanently failed: {}",
                    message
                );
                DispatchOutcome::Failed
            }
        };

        NOTIFICATIONS
            .with_label_values(&[match outcome {
                DispatchOutcome::Delivered => "delivered",
                DispatchOutcome::Failed => "failed",
                _ => "deferred",
            }])
            .inc();

        if status == JobStatus::Synced
            && matches!(outcome, DispatchOutcome::Delivered | DispatchOutcome::Failed)
        {
            self.finish_job(job_id).await;
        }
        Ok(outcome)
    }

    /// Move a job from `synced` to `notified`. Losing the race to another
    /// finisher is fine.
    async fn finish_job(&self, job_id: &str) {
        let _guard = self.locks.lock(job_id).await;
        match self
            .store
            .transition(job_id, JobStatus::Synced, Transition::to(JobStatus::Notified))
        {
            Ok(_) => {
                JOB_TRANSITIONS
                    .with_label_values(&[JobStatus::Notified.as_str()])
                    .inc();
                info!("Job {} notified", job_id);
            }
            Err(JobError::StatusMismatch { .. }) | Err(JobError::NotFound(_)) => {}
            Err(e) => warn!("Failed to mark job {} notified: {}", job_id, e),
        }
    }

    /// Redeliver what is still owed: requeue rows whose sender lease ran
    /// out, send pending rows, and repair `synced` jobs whose message was
    /// never queued or already settled.
    pub async fn retry_pending(&self, lease_cutoff: DateTime<Utc>) -> Result<SweepReport, NotifyError> {
        let mut report = SweepReport {
            requeued: self.outbox.requeue_stale(lease_cutoff)?,
            ..SweepReport::default()
        };
        if report.requeued > 0 {
            info!("Requeued {} notifications with expired leases", report.requeued);
        }

        let pending = self.outbox.list_pending(SWEEP_BATCH)?;
        let outcomes: Vec<_> = stream::iter(pending)
            .map(|n| async move { self.dispatch(&n.job_id, n.status).await })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;
        for outcome in outcomes {
            match outcome {
                Ok(DispatchOutcome::Delivered) => report.delivered += 1,
                Ok(DispatchOutcome::Deferred) => report.deferred += 1,
                Ok(DispatchOutcome::Failed) => report.failed += 1,
                Ok(DispatchOutcome::Skipped) => {}
                Err(e) => warn!("Notification retry failed: {}", e),
            }
        }

        let synced = self
            .store
            .list(
                &JobFilter::new()
                    .with_status(JobStatus::Synced)
                    .with_limit(SWEEP_BATCH as i64),
            )
            .map_err(|e| NotifyError::Store(e.to_string()))?;
        for job in synced {
            match self.outbox.get(&job.id, JobStatus::Synced)? {
                None => match self.announce(&job).await? {
                    DispatchOutcome::Delivered => report.delivered += 1,
                    DispatchOutcome::Deferred => report.deferred += 1,
                    DispatchOutcome::Failed => report.failed += 1,
                    DispatchOutcome::Skipped => {}
                },
                Some(row) if row.state.is_final() => {
                    self.finish_job(&job.id).await;
                    report.finalized += 1;
                }
                Some(_) => {}
            }
        }

        Ok(report)
    }
}
