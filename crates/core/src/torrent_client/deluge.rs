//! Deluge backend, reached through deluge-web's JSON gateway.
//!
//! deluge-web proxies the daemon's RPC: after `auth.login` the web session
//! must also be attached to a daemon (`web.connect`) before `core.*` calls
//! work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::DelugeConfig;

use super::magnet;
use super::{RemoteClient, RemoteClientError, RemoteSession, StatusSnapshot, TorrentSource, TorrentState};

const STATUS_KEYS: [&str; 6] = ["hash", "name", "state", "progress", "save_path", "message"];

/// Connector for a deluge-web instance.
pub struct DelugeClient {
    config: DelugeConfig,
    timeout: Duration,
}

impl DelugeClient {
    pub fn new(config: DelugeConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl RemoteClient for DelugeClient {
    fn name(&self) -> &str {
        "deluge"
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteClientError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| RemoteClientError::Unreachable(format!("http client: {e}")))?;

        let session = DelugeSession {
            client,
            endpoint: format!(
                "{}{}",
                self.config.url.trim_end_matches('/'),
                self.config.api_path
            ),
            config: self.config.clone(),
            next_id: AtomicU64::new(1),
        };
        session.login().await?;
        session.attach_daemon().await?;
        Ok(Box::new(session))
    }
}

pub struct DelugeSession {
    client: Client,
    endpoint: String,
    config: DelugeConfig,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

impl DelugeSession {
    /// Call `method`. The outer error is transport; the inner one is the
    /// RPC error object returned by Deluge.
    async fn call(&self, method: &str, params: Value) -> Result<Result<Value, RpcError>, RemoteClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "method": method, "params": params, "id": id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteClientError::Unreachable(format!(
                "deluge-web HTTP {status}"
            )));
        }

        let parsed: RpcResponse = response.json().await.map_err(|e| {
            RemoteClientError::Unreachable(format!("unexpected deluge-web response: {e}"))
        })?;
        Ok(match parsed.error {
            Some(error) => Err(error),
            None => Ok(parsed.result),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RemoteClientError> {
        self.call(method, params).await?.map_err(|e| {
            RemoteClientError::Unreachable(format!("{method} failed ({}): {}", e.code, e.message))
        })
    }

    async fn login(&self) -> Result<(), RemoteClientError> {
        let ok = self.rpc("auth.login", json!([self.config.password])).await?;
        if ok.as_bool() == Some(true) {
            debug!("deluge-web login successful");
            Ok(())
        } else {
            Err(RemoteClientError::Unreachable(
                "deluge-web login failed: invalid password".to_string(),
            ))
        }
    }

    async fn attach_daemon(&self) -> Result<(), RemoteClientError> {
        if self.rpc("web.connected", json!([])).await?.as_bool() == Some(true) {
            return Ok(());
        }

        let hosts = self.rpc("web.get_hosts", json!([])).await?;
        let host_id = first_host_id(&hosts).ok_or_else(|| {
            RemoteClientError::Unreachable("deluge-web has no daemon configured".to_string())
        })?;
        self.rpc("web.connect", json!([host_id])).await?;
        info!(host_id = %host_id, "deluge-web attached to daemon");
        Ok(())
    }

    fn add_options(&self) -> Value {
        match &self.config.download_location {
            Some(dir) => json!({ "download_location": dir }),
            None => json!({}),
        }
    }
}

#[async_trait]
impl RemoteSession for DelugeSession {
    async fn submit(&self, source: &TorrentSource) -> Result<String, RemoteClientError> {
        let (outcome, known_hash) = match source {
            TorrentSource::Magnet { uri } => {
                let hash = magnet::info_hash(uri).ok_or_else(|| {
                    RemoteClientError::Rejected("magnet has no valid btih info hash".to_string())
                })?;
                let outcome = self
                    .call("core.add_torrent_magnet", json!([uri, self.add_options()]))
                    .await?;
                (outcome, Some(hash))
            }
            TorrentSource::TorrentFile { filename, data } => {
                let name = filename.clone().unwrap_or_else(|| "upload.torrent".to_string());
                let outcome = self
                    .call(
                        "core.add_torrent_file",
                        json!([name, STANDARD.encode(data), self.add_options()]),
                    )
                    .await?;
                (outcome, None)
            }
        };

        match outcome {
            Ok(Value::String(hash)) => Ok(hash.to_lowercase()),
            Ok(_) | Err(_) => {
                // Duplicates come back as null or "already in session".
                if let Some(hash) = known_hash {
                    if self.status(&hash).await?.is_some() {
                        debug!(hash = %hash, "Deluge already had the torrent");
                        return Ok(hash);
                    }
                }
                let reason = match outcome {
                    Err(e) => e.message,
                    Ok(_) => "Deluge did not add the torrent".to_string(),
                };
                Err(RemoteClientError::Rejected(reason))
            }
        }
    }

    async fn status(&self, key: &str) -> Result<Option<StatusSnapshot>, RemoteClientError> {
        let result = self
            .rpc(
                "core.get_torrent_status",
                json!([key.to_lowercase(), STATUS_KEYS]),
            )
            .await?;
        parse_torrent_status(key, &result)
    }

    async fn remove(&self, key: &str, delete_data: bool) -> Result<bool, RemoteClientError> {
        match self
            .call("core.remove_torrent", json!([key.to_lowercase(), delete_data]))
            .await?
        {
            Ok(removed) => Ok(removed.as_bool().unwrap_or(false)),
            Err(e) if e.message.contains("InvalidTorrent") => Ok(false),
            Err(e) => Err(RemoteClientError::Unreachable(format!(
                "core.remove_torrent failed: {}",
                e.message
            ))),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.rpc("auth.delete_session", json!([])).await {
            debug!(error = %e, "deluge-web logout failed");
        }
    }
}

#[derive(Debug, Deserialize)]
struct DelugeTorrent {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    /// Percent, 0-100.
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    message: String,
}

/// `core.get_torrent_status` answers `{}` for hashes it does not know.
fn parse_torrent_status(key: &str, result: &Value) -> Result<Option<StatusSnapshot>, RemoteClientError> {
    match result {
        Value::Null => return Ok(None),
        Value::Object(map) if map.is_empty() => return Ok(None),
        _ => {}
    }

    let torrent: DelugeTorrent = serde_json::from_value(result.clone()).map_err(|e| {
        RemoteClientError::Unreachable(format!("unexpected torrent status: {e}"))
    })?;
    let state = parse_deluge_state(&torrent.state);

    Ok(Some(StatusSnapshot {
        hash: torrent.hash.unwrap_or_else(|| key.to_string()).to_lowercase(),
        name: torrent.name,
        state,
        progress: (torrent.progress / 100.0).clamp(0.0, 1.0),
        save_path: (!torrent.save_path.is_empty()).then_some(torrent.save_path),
        error: (state == TorrentState::Error).then_some(torrent.message),
    }))
}

fn parse_deluge_state(state: &str) -> TorrentState {
    match state {
        "Downloading" | "Allocating" => TorrentState::Downloading,
        "Seeding" => TorrentState::Seeding,
        "Paused" => TorrentState::Paused,
        "Checking" | "Moving" => TorrentState::Checking,
        "Queued" => TorrentState::Queued,
        "Error" => TorrentState::Error,
        _ => TorrentState::Unknown,
    }
}

/// `web.get_hosts` returns `[[id, host, port, status-or-user], ...]`.
fn first_host_id(hosts: &Value) -> Option<String> {
    hosts
        .as_array()?
        .first()?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent_client::RemoteStatus;

    #[test]
    fn test_parse_deluge_state() {
        assert_eq!(parse_deluge_state("Downloading"), TorrentState::Downloading);
        assert_eq!(parse_deluge_state("Seeding"), TorrentState::Seeding);
        assert_eq!(parse_deluge_state("Moving"), TorrentState::Checking);
        assert_eq!(parse_deluge_state("Error"), TorrentState::Error);
        assert_eq!(parse_deluge_state("downloading"), TorrentState::Unknown);
    }

    #[test]
    fn test_progress_is_scaled_from_percent() {
        let result = json!({
            "hash": "ABC",
            "name": "Dune Part Two",
            "state": "Downloading",
            "progress": 37.5,
            "save_path": "/var/lib/deluge/downloads",
            "message": "OK"
        });
        let snap = parse_torrent_status("abc", &result).unwrap().unwrap();
        assert_eq!(snap.remote_status(), RemoteStatus::Downloading { progress: 0.375 });
        assert!(snap.error.is_none());
        assert_eq!(
            snap.hint_path().as_deref(),
            Some("/var/lib/deluge/downloads/Dune Part Two")
        );
    }

    #[test]
    fn test_empty_status_is_absent() {
        assert!(parse_torrent_status("abc", &json!({})).unwrap().is_none());
        assert!(parse_torrent_status("abc", &Value::Null).unwrap().is_none());
    }

    #[test]
    fn test_error_state_uses_message() {
        let result = json!({ "state": "Error", "progress": 12.0, "message": "Disk full" });
        let snap = parse_torrent_status("ABC", &result).unwrap().unwrap();
        assert_eq!(snap.hash, "abc");
        assert_eq!(
            snap.remote_status(),
            RemoteStatus::Errored { message: "Disk full".to_string() }
        );
    }

    #[test]
    fn test_first_host_id() {
        let hosts = json!([["6f1a", "127.0.0.1", 58846, "Online"]]);
        assert_eq!(first_host_id(&hosts).as_deref(), Some("6f1a"));
        assert_eq!(first_host_id(&json!([])), None);
    }
}
