//! User notifications with at-least-once, per-transition deduplicated
//! delivery.
//!
//! Every user-visible transition enqueues one outbox row keyed by
//! `(job_id, status)`. Rows are claimed before sending, so a replayed
//! transition or a concurrent dispatch never sends twice.

mod dispatcher;
mod outbox;
mod telegram;
mod types;
mod webhook;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher, SweepReport};
pub use outbox::{NotificationOutbox, SqliteOutbox};
pub use telegram::TelegramNotifier;
pub use types::*;
pub use webhook::WebhookNotifier;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, NotifierBackend, NotifierConfig};

/// Build the configured sender, if any.
pub fn create_notifier(config: &NotifierConfig) -> Result<Option<Arc<dyn Notifier>>, ConfigError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let invalid = |e: NotifyError| ConfigError::ValidationError(e.to_string());

    let notifier: Arc<dyn Notifier> = match config.backend {
        None => return Ok(None),
        Some(NotifierBackend::Telegram) => {
            let section = config.telegram.as_ref().ok_or_else(|| {
                ConfigError::ValidationError("notifier.telegram section is missing".to_string())
            })?;
            Arc::new(TelegramNotifier::new(section, timeout).map_err(invalid)?)
        }
        Some(NotifierBackend::Webhook) => {
            let section = config.webhook.as_ref().ok_or_else(|| {
                ConfigError::ValidationError("notifier.webhook section is missing".to_string())
            })?;
            Arc::new(WebhookNotifier::new(section, timeout).map_err(invalid)?)
        }
    };
    Ok(Some(notifier))
}
