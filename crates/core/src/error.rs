//! Crate-level error aggregating the per-module errors.

use thiserror::Error;

use crate::job::JobError;
use crate::notify::NotifyError;
use crate::torrent_client::RemoteClientError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Remote(#[from] RemoteClientError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Malformed completion report from the sync agent.
    #[error("invalid completion report: {0}")]
    InvalidReport(String),
}
