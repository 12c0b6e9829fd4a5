//! Transmission RPC backend (JSON-RPC over HTTP).
//!
//! Every request must carry the `X-Transmission-Session-Id` header. The
//! daemon answers 409 with a fresh id when it is missing or stale; the id is
//! adopted and the request repeated once.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::TransmissionConfig;

use super::{RemoteClient, RemoteClientError, RemoteSession, StatusSnapshot, TorrentSource, TorrentState};

const SESSION_HEADER: &str = "X-Transmission-Session-Id";
const STATUS_FIELDS: [&str; 7] = [
    "hashString",
    "name",
    "status",
    "percentDone",
    "error",
    "errorString",
    "downloadDir",
];

/// Connector for a Transmission daemon.
pub struct TransmissionClient {
    config: TransmissionConfig,
    timeout: Duration,
}

impl TransmissionClient {
    pub fn new(config: TransmissionConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl RemoteClient for TransmissionClient {
    fn name(&self) -> &str {
        "transmission"
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteClientError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| RemoteClientError::Unreachable(format!("http client: {e}")))?;

        let session = TransmissionSession {
            client,
            endpoint: format!(
                "{}{}",
                self.config.url.trim_end_matches('/'),
                self.config.rpc_path
            ),
            config: self.config.clone(),
            session_id: RwLock::new(None),
        };
        // Performs the CSRF handshake and checks credentials.
        session.rpc("session-get", json!({ "fields": ["version"] })).await?;
        Ok(Box::new(session))
    }
}

pub struct TransmissionSession {
    client: Client,
    endpoint: String,
    config: TransmissionConfig,
    session_id: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

impl TransmissionSession {
    async fn post(&self, body: &Value) -> Result<reqwest::Response, RemoteClientError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(user) = &self.config.username {
            request = request.basic_auth(user, self.config.password.as_ref());
        }
        if let Some(id) = self.session_id.read().await.as_ref() {
            request = request.header(SESSION_HEADER, id);
        }
        Ok(request.send().await?)
    }

    /// Call `method`; returns `arguments` when `result` is "success", or
    /// the daemon's result string otherwise.
    async fn call(&self, method: &str, arguments: Value) -> Result<Result<Value, String>, RemoteClientError> {
        let body = json!({ "method": method, "arguments": arguments });

        let mut response = self.post(&body).await?;
        if response.status() == StatusCode::CONFLICT {
            let id = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    RemoteClientError::Unreachable("409 without a session id".to_string())
                })?;
            debug!("Transmission session id refreshed");
            *self.session_id.write().await = Some(id);
            response = self.post(&body).await?;
        }

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RemoteClientError::Unreachable(
                    "Transmission authentication failed".to_string(),
                ))
            }
            s => {
                return Err(RemoteClientError::Unreachable(format!(
                    "Transmission HTTP {s}"
                )))
            }
        }

        let parsed: RpcResponse = response.json().await.map_err(|e| {
            RemoteClientError::Unreachable(format!("unexpected Transmission response: {e}"))
        })?;
        if parsed.result == "success" {
            Ok(Ok(parsed.arguments))
        } else {
            Ok(Err(parsed.result))
        }
    }

    /// Call where any non-success result is a transport-level problem.
    async fn rpc(&self, method: &str, arguments: Value) -> Result<Value, RemoteClientError> {
        self.call(method, arguments).await?.map_err(|result| {
            RemoteClientError::Unreachable(format!("Transmission {method}: {result}"))
        })
    }
}

#[async_trait]
impl RemoteSession for TransmissionSession {
    async fn submit(&self, source: &TorrentSource) -> Result<String, RemoteClientError> {
        let mut arguments = match source {
            TorrentSource::Magnet { uri } => json!({ "filename": uri }),
            TorrentSource::TorrentFile { data, .. } => json!({ "metainfo": STANDARD.encode(data) }),
        };
        if let Some(dir) = &self.config.download_dir {
            arguments["download-dir"] = json!(dir);
        }

        // Add failures (bad magnet, corrupt file, no space) are final.
        let added = self
            .call("torrent-add", arguments)
            .await?
            .map_err(RemoteClientError::Rejected)?;
        parse_added_hash(&added)
    }

    async fn status(&self, key: &str) -> Result<Option<StatusSnapshot>, RemoteClientError> {
        let arguments = self
            .rpc(
                "torrent-get",
                json!({ "ids": [key.to_lowercase()], "fields": STATUS_FIELDS }),
            )
            .await?;
        parse_torrent_get(&arguments)
    }

    async fn remove(&self, key: &str, delete_data: bool) -> Result<bool, RemoteClientError> {
        // torrent-remove succeeds for unknown ids, so check presence first.
        if self.status(key).await?.is_none() {
            return Ok(false);
        }
        self.rpc(
            "torrent-remove",
            json!({ "ids": [key.to_lowercase()], "delete-local-data": delete_data }),
        )
        .await?;
        Ok(true)
    }

    async fn close(&self) {
        // Transmission sessions are stateless apart from the CSRF id.
        *self.session_id.write().await = None;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrTorrent {
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    error: i64,
    #[serde(default)]
    error_string: String,
    #[serde(default)]
    download_dir: String,
}

impl TrTorrent {
    fn into_snapshot(self) -> StatusSnapshot {
        // error 3 = local error (disk full, missing data); 1 and 2 are
        // tracker warnings/errors that do not stop the download.
        let local_error = self.error == 3;
        StatusSnapshot {
            hash: self.hash_string.to_lowercase(),
            name: self.name,
            state: if local_error {
                TorrentState::Error
            } else {
                parse_tr_status(self.status)
            },
            progress: self.percent_done,
            save_path: (!self.download_dir.is_empty()).then_some(self.download_dir),
            error: local_error.then_some(self.error_string),
        }
    }
}

fn parse_added_hash(arguments: &Value) -> Result<String, RemoteClientError> {
    ["torrent-added", "torrent-duplicate"]
        .iter()
        .find_map(|k| arguments.get(*k))
        .and_then(|t| t.get("hashString"))
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .ok_or_else(|| {
            RemoteClientError::Unreachable("torrent-add response without a hash".to_string())
        })
}

fn parse_torrent_get(arguments: &Value) -> Result<Option<StatusSnapshot>, RemoteClientError> {
    let torrents: Vec<TrTorrent> = match arguments.get("torrents") {
        Some(list) => serde_json::from_value(list.clone()).map_err(|e| {
            RemoteClientError::Unreachable(format!("unexpected torrent-get response: {e}"))
        })?,
        None => Vec::new(),
    };
    Ok(torrents.into_iter().next().map(TrTorrent::into_snapshot))
}

/// Map Transmission's numeric status (0-6).
fn parse_tr_status(status: i64) -> TorrentState {
    match status {
        0 => TorrentState::Paused,
        1 | 3 | 5 => TorrentState::Queued,
        2 => TorrentState::Checking,
        4 => TorrentState::Downloading,
        6 => TorrentState::Seeding,
        _ => TorrentState::Unknown,
    }
}
