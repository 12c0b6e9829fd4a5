//! Remote torrent client adapter.
//!
//! One [`RemoteClient`] is selected at configuration time. Work is done
//! inside a [`RemoteSession`] opened per unit of work (a monitor tick, an
//! intake request, a retention sweep) and closed afterwards.

mod call;
mod deluge;
pub mod magnet;
mod qbittorrent;
mod transmission;
mod types;

pub use call::{bounded, with_retry, CallPolicy};
pub use deluge::DelugeClient;
pub use qbittorrent::QBittorrentClient;
pub use transmission::TransmissionClient;
pub use types::*;

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, TorrentClientBackend, TorrentClientConfig};

/// Build the connector for the configured backend.
pub fn create_remote_client(
    config: &TorrentClientConfig,
) -> Result<Arc<dyn RemoteClient>, ConfigError> {
    let timeout = Duration::from_secs(config.calls.timeout_secs);
    let missing = |name: &str| {
        ConfigError::ValidationError(format!("torrent_client.{name} section is missing"))
    };

    Ok(match config.backend {
        TorrentClientBackend::Qbittorrent => {
            let section = config.qbittorrent.clone().ok_or_else(|| missing("qbittorrent"))?;
            Arc::new(QBittorrentClient::new(section, timeout))
        }
        TorrentClientBackend::Transmission => {
            let section = config
                .transmission
                .clone()
                .ok_or_else(|| missing("transmission"))?;
            Arc::new(TransmissionClient::new(section, timeout))
        }
        TorrentClientBackend::Deluge => {
            let section = config.deluge.clone().ok_or_else(|| missing("deluge"))?;
            Arc::new(DelugeClient::new(section, timeout))
        }
    })
}

/// A logged-in session that is closed exactly once.
///
/// Call [`SessionGuard::close`] when done. If the guard is dropped first (the
/// owning future was cancelled by a deadline, say) the logout is spawned on
/// the runtime instead.
pub struct SessionGuard {
    session: Arc<dyn RemoteSession>,
    timeout: Duration,
    closed: bool,
}

impl SessionGuard {
    fn new(session: Box<dyn RemoteSession>, timeout: Duration) -> Self {
        Self {
            session: Arc::from(session),
            timeout,
            closed: false,
        }
    }

    /// Log out, bounded by the call timeout.
    pub async fn close(mut self) {
        self.closed = true;
        teardown(Arc::clone(&self.session), self.timeout).await;
    }
}

impl Deref for SessionGuard {
    type Target = dyn RemoteSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let session = Arc::clone(&self.session);
        let timeout = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Session dropped while open, closing in background");
                handle.spawn(teardown(session, timeout));
            }
            Err(_) => tracing::warn!("Session dropped outside a runtime, left open"),
        }
    }
}

async fn teardown(session: Arc<dyn RemoteSession>, timeout: Duration) {
    if bounded(timeout, async {
        session.close().await;
        Ok(())
    })
    .await
    .is_err()
    {
        tracing::debug!("Session teardown timed out");
    }
}

/// Open a session with the policy's retries and timeout.
pub async fn open_session(
    client: &dyn RemoteClient,
    policy: &CallPolicy,
) -> Result<SessionGuard, RemoteClientError> {
    let session = with_retry(policy, "connect", || client.connect()).await?;
    Ok(SessionGuard::new(session, policy.timeout))
}
