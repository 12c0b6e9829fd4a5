//! Types shared by every torrent client backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a torrent client backend.
///
/// Only two outcomes matter to callers: the backend could not be reached
/// (retry later, nothing changes) or it refused the request (terminal for
/// the job).
#[derive(Debug, Clone, Error)]
pub enum RemoteClientError {
    /// Network failure, authentication failure or an unexpected response.
    #[error("torrent client unreachable: {0}")]
    Unreachable(String),

    /// The call did not finish within the configured bound.
    #[error("torrent client call timed out after {0:?}")]
    Timeout(Duration),

    /// Bad magnet, corrupt torrent, disk full.
    #[error("torrent client rejected the request: {0}")]
    Rejected(String),
}

impl RemoteClientError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteClientError::Rejected(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteClientError::Unreachable(_) => "unreachable",
            RemoteClientError::Timeout(_) => "timeout",
            RemoteClientError::Rejected(_) => "rejected",
        }
    }
}

impl From<reqwest::Error> for RemoteClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteClientError::Unreachable(format!("request timed out: {e}"))
        } else if e.is_connect() {
            RemoteClientError::Unreachable(format!("connection failed: {e}"))
        } else {
            RemoteClientError::Unreachable(e.to_string())
        }
    }
}

/// What to hand to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorrentSource {
    Magnet {
        uri: String,
    },
    TorrentFile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl TorrentSource {
    pub fn magnet(uri: impl Into<String>) -> Self {
        TorrentSource::Magnet { uri: uri.into() }
    }

    pub fn torrent_file(filename: Option<String>, data: Vec<u8>) -> Self {
        TorrentSource::TorrentFile { filename, data }
    }

    /// Short description for logs; never the payload.
    pub fn describe(&self) -> String {
        match self {
            TorrentSource::Magnet { uri } => match super::magnet::info_hash(uri) {
                Some(hash) => format!("magnet {hash}"),
                None => "magnet".to_string(),
            },
            TorrentSource::TorrentFile { filename, data } => format!(
                "torrent file {} ({} bytes)",
                filename.as_deref().unwrap_or("<unnamed>"),
                data.len()
            ),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Backend-native torrent state, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    Downloading,
    Seeding,
    Paused,
    Checking,
    Queued,
    Stalled,
    Error,
    Unknown,
}

impl TorrentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Checking => "checking",
            TorrentState::Queued => "queued",
            TorrentState::Stalled => "stalled",
            TorrentState::Error => "error",
            TorrentState::Unknown => "unknown",
        }
    }
}

/// One status read of a torrent present in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Info hash, lower-case hex.
    pub hash: String,
    pub name: String,
    pub state: TorrentState,
    /// Download progress in `0.0..=1.0`.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a status read means for the job.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Absent,
    Downloading { progress: f64 },
    Seeding,
    Errored { message: String },
}

impl StatusSnapshot {
    /// Complete payloads count as seeding even when the backend reports
    /// them paused or stopped.
    pub fn remote_status(&self) -> RemoteStatus {
        if self.state == TorrentState::Error {
            return RemoteStatus::Errored {
                message: self
                    .error
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "torrent client reported an error".to_string()),
            };
        }
        if self.progress >= 1.0 || self.state == TorrentState::Seeding {
            return RemoteStatus::Seeding;
        }
        RemoteStatus::Downloading {
            progress: self.progress.clamp(0.0, 1.0),
        }
    }

    /// Location of the payload on the seedbox: save path joined with the
    /// torrent name.
    pub fn hint_path(&self) -> Option<String> {
        let dir = self.save_path.as_deref()?.trim_end_matches('/');
        if self.name.is_empty() {
            return Some(dir.to_string());
        }
        Some(format!("{}/{}", dir, self.name))
    }
}

impl RemoteStatus {
    pub fn from_snapshot(snapshot: Option<&StatusSnapshot>) -> Self {
        snapshot.map_or(RemoteStatus::Absent, StatusSnapshot::remote_status)
    }
}

/// Connector for one configured backend.
///
/// A connector is cheap to keep for the process lifetime; all
/// authentication state lives in the [`RemoteSession`] it opens.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Log in and return a session. Callers must [`RemoteSession::close`]
    /// it when done, whether or not the work inside succeeded.
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteClientError>;
}

/// An authenticated conversation with the backend.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Hand a torrent to the backend. Returns its info hash.
    async fn submit(&self, source: &TorrentSource) -> Result<String, RemoteClientError>;

    /// Current state of a torrent, `None` if the backend does not have it.
    async fn status(&self, key: &str) -> Result<Option<StatusSnapshot>, RemoteClientError>;

    /// Remove a torrent. Returns whether the backend had it.
    async fn remove(&self, key: &str, delete_data: bool) -> Result<bool, RemoteClientError>;

    /// Log out. Best effort; failures are logged by the backend.
    async fn close(&self);
}
