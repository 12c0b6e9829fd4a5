//! Job intake: create a job and hand it to the remote client.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::TrackerError;
use crate::job::{
    AcquisitionJob, CreateJobRequest, JobError, JobLocks, JobStatus, JobStore, Transition,
};
use crate::metrics::{JOBS_CREATED, JOB_TRANSITIONS};
use crate::notify::NotificationDispatcher;
use crate::torrent_client::{
    open_session, with_retry, CallPolicy, RemoteClient, RemoteClientError,
    RemoteSession,
};

/// Creates jobs and submits queued jobs to the configured backend.
pub struct JobService {
    pub(super) store: Arc<dyn JobStore>,
    pub(super) client: Arc<dyn RemoteClient>,
    pub(super) dispatcher: Arc<NotificationDispatcher>,
    pub(super) locks: JobLocks,
    pub(super) policy: CallPolicy,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        client: Arc<dyn RemoteClient>,
        dispatcher: Arc<NotificationDispatcher>,
        locks: JobLocks,
        policy: CallPolicy,
    ) -> Self {
        Self {
            store,
            client,
            dispatcher,
            locks,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a job and try to submit it right away.
    ///
    /// An unreachable backend is not an error: the job stays `queued` and
    /// the monitor submits it on a later tick.
    pub async fn request_download(
        &self,
        request: CreateJobRequest,
    ) -> Result<AcquisitionJob, TrackerError> {
        let job = self.store.create(request)?;
        JOBS_CREATED.inc();
        info!(
            job_id = %job.id,
            owner = %job.owner,
            "Created job for '{}' from {}",
            job.display_name,
            job.source.describe()
        );

        let session = match open_session(self.client.as_ref(), &self.policy).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Remote client unreachable, job {} stays queued: {}", job.id, e);
                return Ok(job);
            }
        };
        let submitted = self.submit_on(&*session, &job.id).await;
        session.close().await;

        match submitted {
            Ok(job) => Ok(job),
            Err(TrackerError::Remote(e)) if e.is_retryable() => {
                warn!("Submission of job {} deferred: {}", job.id, e);
                Ok(self.store.get(&job.id)?.unwrap_or(job))
            }
            Err(e) => Err(e),
        }
    }

    /// Submit one `queued` job on an open session and advance it to
    /// `downloading`. Jobs that already left `queued` are returned as-is.
    ///
    /// A job that already has a correlation key is not submitted again.
    pub async fn submit_on(
        &self,
        session: &dyn RemoteSession,
        job_id: &str,
    ) -> Result<AcquisitionJob, TrackerError> {
        let guard = self.locks.lock(job_id).await;
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Queued {
            return Ok(job);
        }

        if job.correlation_key.is_none() {
            match with_retry(&self.policy, "submit", || session.submit(&job.source)).await {
                Ok(key) => {
                    self.store.attach_correlation_key(&job.id, &key)?;
                    info!(job_id = %job.id, key = %key, "Remote client accepted job");
                }
                Err(RemoteClientError::Rejected(reason)) => {
                    let failed = self.store.transition(
                        &job.id,
                        JobStatus::Queued,
                        Transition::failed(format!("rejected by remote client: {reason}")),
                    )?;
                    JOB_TRANSITIONS
                        .with_label_values(&[JobStatus::Failed.as_str()])
                        .inc();
                    warn!(job_id = %job.id, "Remote client rejected job: {}", reason);
                    drop(guard);
                    if let Err(e) = self.dispatcher.announce(&failed).await {
                        warn!("Failed to queue notification for {}: {}", failed.id, e);
                    }
                    return Ok(failed);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let downloading =
            self.store
                .transition(&job.id, JobStatus::Queued, Transition::to(JobStatus::Downloading))?;
        JOB_TRANSITIONS
            .with_label_values(&[JobStatus::Downloading.as_str()])
            .inc();
        Ok(downloading)
    }
}
