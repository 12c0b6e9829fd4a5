use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::job::{AcquisitionJob, JobStatus};

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The messaging service refused the message; retrying will not help.
    #[error("notification rejected: {0}")]
    Rejected(String),

    #[error("notification setup failed: {0}")]
    Setup(String),

    #[error("notification outbox error: {0}")]
    Store(String),
}

/// Result of a send that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Temporarily unavailable; the message stays queued.
    Unavailable,
}

/// Messaging front end. Renders `text` to the opaque user id `owner`.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, owner: &str, text: &str) -> Result<Delivery, NotifyError>;
}

/// Outbox row state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sending,
    Delivered,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sending => "sending",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::Failed)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryState::Pending),
            "sending" => Ok(DeliveryState::Sending),
            "delivered" => Ok(DeliveryState::Delivered),
            "failed" => Ok(DeliveryState::Failed),
            other => Err(NotifyError::Store(format!("unknown delivery state {other}"))),
        }
    }
}

/// One queued message for one job transition.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub job_id: String,
    pub status: JobStatus,
    pub owner: String,
    pub text: String,
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const NAME_LIMIT: usize = 80;

fn short_name(job: &AcquisitionJob) -> String {
    let name = job.display_name.trim();
    if name.chars().count() <= NAME_LIMIT {
        return name.to_string();
    }
    let cut: String = name.chars().take(NAME_LIMIT).collect();
    format!("{cut}…")
}

/// Message for a job that just entered its current status, if the owner
/// should hear about it.
pub fn message_for(job: &AcquisitionJob) -> Option<String> {
    let name = short_name(job);
    match job.status {
        JobStatus::SyncPending => Some(format!("Downloaded to the seedbox: {name}. Copying home…")),
        JobStatus::Synced => {
            let folder = job
                .destination_path
                .as_deref()
                .map(|p| p.trim_end_matches('/'))
                .and_then(|p| p.rsplit('/').next())
                .filter(|f| !f.is_empty());
            Some(match folder {
                Some(folder) => format!("Downloaded and ready to watch! {name} / {folder}"),
                None => format!("Downloaded and ready to watch! {name}"),
            })
        }
        JobStatus::Failed => Some(format!(
            "Download failed: {name} ({})",
            job.last_error.as_deref().unwrap_or("unknown error")
        )),
        _ => None,
    }
}

/// Map a messaging API status code: 2xx delivered; 408, 429 and 5xx
/// temporarily unavailable; anything else a rejection.
pub fn classify_status(status: StatusCode, body: &str) -> Result<Delivery, NotifyError> {
    if status.is_success() {
        Ok(Delivery::Delivered)
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Ok(Delivery::Unavailable)
    } else {
        let detail: String = body.trim().chars().take(200).collect();
        Err(NotifyError::Rejected(format!("HTTP {status}: {detail}")))
    }
}
