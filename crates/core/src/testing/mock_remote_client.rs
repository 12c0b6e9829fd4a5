//! In-memory remote torrent client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::torrent_client::{
    magnet, RemoteClient, RemoteClientError, RemoteSession, StatusSnapshot, TorrentSource,
    TorrentState,
};

#[derive(Debug, Default)]
struct MockState {
    torrents: HashMap<String, StatusSnapshot>,
    submitted: Vec<TorrentSource>,
    unreachable: bool,
    reject_next: Option<String>,
    status_delay: Option<Duration>,
    connects: usize,
    closes: usize,
}

/// Remote client backed by a shared map of torrents.
///
/// Submitted torrents start downloading at 0% under `/downloads`, named
/// after the magnet's `dn` (or the file name). Keys are the magnet's info
/// hash, or a digest of the file bytes.
#[derive(Debug, Clone, Default)]
pub struct MockRemoteClient {
    state: Arc<Mutex<MockState>>,
}

impl MockRemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call fails with `Unreachable` while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// The next `submit` fails with `Rejected(reason)`.
    pub fn reject_next_submit(&self, reason: impl Into<String>) {
        self.state().reject_next = Some(reason.into());
    }

    /// Every `status` call takes this long to answer.
    pub fn delay_status(&self, delay: Duration) {
        self.state().status_delay = Some(delay);
    }

    /// Set progress, adding the torrent if missing. At 1.0 it seeds.
    pub fn set_progress(&self, key: &str, progress: f64) {
        let mut state = self.state();
        let torrent = state
            .torrents
            .entry(key.to_string())
            .or_insert_with(|| snapshot(key, key));
        torrent.progress = progress.clamp(0.0, 1.0);
        torrent.state = if progress >= 1.0 {
            TorrentState::Seeding
        } else {
            TorrentState::Downloading
        };
        torrent.error = None;
    }

    pub fn set_error(&self, key: &str, message: impl Into<String>) {
        if let Some(torrent) = self.state().torrents.get_mut(key) {
            torrent.state = TorrentState::Error;
            torrent.error = Some(message.into());
        }
    }

    /// Drop a torrent as if removed out-of-band.
    pub fn vanish(&self, key: &str) {
        self.state().torrents.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().torrents.contains_key(key)
    }

    pub fn submitted(&self) -> Vec<TorrentSource> {
        self.state().submitted.clone()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    fn check_reachable(&self) -> Result<(), RemoteClientError> {
        if self.state().unreachable {
            return Err(RemoteClientError::Unreachable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

fn snapshot(key: &str, name: &str) -> StatusSnapshot {
    StatusSnapshot {
        hash: key.to_string(),
        name: name.to_string(),
        state: TorrentState::Downloading,
        progress: 0.0,
        save_path: Some("/downloads".to_string()),
        error: None,
    }
}

fn key_and_name(source: &TorrentSource) -> Result<(String, String), RemoteClientError> {
    match source {
        TorrentSource::Magnet { uri } => {
            let key = magnet::info_hash(uri)
                .ok_or_else(|| RemoteClientError::Rejected("invalid magnet".to_string()))?;
            let name = magnet::display_name(uri).unwrap_or_else(|| key.clone());
            Ok((key, name))
        }
        TorrentSource::TorrentFile { filename, data } => {
            let digest = Sha256::digest(data);
            let key: String = digest[..20].iter().map(|b| format!("{b:02x}")).collect();
            let name = filename
                .as_deref()
                .map(|f| f.trim_end_matches(".torrent").to_string())
                .unwrap_or_else(|| key.clone());
            Ok((key, name))
        }
    }
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteClientError> {
        self.check_reachable()?;
        self.state().connects += 1;
        Ok(Box::new(MockSession {
            client: self.clone(),
        }))
    }
}

struct MockSession {
    client: MockRemoteClient,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn submit(&self, source: &TorrentSource) -> Result<String, RemoteClientError> {
        self.client.check_reachable()?;
        let mut state = self.client.state();
        if let Some(reason) = state.reject_next.take() {
            return Err(RemoteClientError::Rejected(reason));
        }
        let (key, name) = key_and_name(source)?;
        state.submitted.push(source.clone());
        state
            .torrents
            .entry(key.clone())
            .or_insert_with(|| snapshot(&key, &name));
        Ok(key)
    }

    async fn status(&self, key: &str) -> Result<Option<StatusSnapshot>, RemoteClientError> {
        self.client.check_reachable()?;
        let delay = self.client.state().status_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.client.state().torrents.get(key).cloned())
    }

    async fn remove(&self, key: &str, _delete_data: bool) -> Result<bool, RemoteClientError> {
        self.client.check_reachable()?;
        Ok(self.client.state().torrents.remove(key).is_some())
    }

    async fn close(&self) {
        self.client.state().closes += 1;
    }
}
