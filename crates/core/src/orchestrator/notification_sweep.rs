use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::PeriodicTask;
use crate::error::TrackerError;
use crate::notify::NotificationDispatcher;

/// Periodic redelivery of notifications the sender could not take.
pub struct NotificationSweep {
    dispatcher: Arc<NotificationDispatcher>,
    sending_lease: Duration,
}

impl NotificationSweep {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, sending_lease: Duration) -> Self {
        Self {
            dispatcher,
            sending_lease,
        }
    }
}

#[async_trait]
impl PeriodicTask for NotificationSweep {
    fn name(&self) -> &'static str {
        "notification_sweep"
    }

    async fn run_tick(&self) -> Result<(), TrackerError> {
        let lease = chrono::Duration::from_std(self.sending_lease)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let report = self.dispatcher.retry_pending(Utc::now() - lease).await?;
        debug!(?report, "Notification sweep finished");
        Ok(())
    }
}
