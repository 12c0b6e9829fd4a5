//! Recording messaging sender.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::notify::{Delivery, Notifier, NotifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifierMode {
    #[default]
    Deliver,
    Unavailable,
    Reject,
}

#[derive(Debug, Default)]
struct Inner {
    mode: NotifierMode,
    sent: Vec<(String, String)>,
    attempts: usize,
}

/// Records delivered `(owner, text)` pairs.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    inner: Arc<Mutex<Inner>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_mode(&self, mode: NotifierMode) {
        self.inner().mode = mode;
    }

    /// Messages actually delivered.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.inner().sent.clone()
    }

    /// Every call, delivered or not.
    pub fn attempts(&self) -> usize {
        self.inner().attempts
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn notify(&self, owner: &str, text: &str) -> Result<Delivery, NotifyError> {
        let mut inner = self.inner();
        inner.attempts += 1;
        match inner.mode {
            NotifierMode::Deliver => {
                inner.sent.push((owner.to_string(), text.to_string()));
                Ok(Delivery::Delivered)
            }
            NotifierMode::Unavailable => Ok(Delivery::Unavailable),
            NotifierMode::Reject => Err(NotifyError::Rejected("chat not found".to_string())),
        }
    }
}
