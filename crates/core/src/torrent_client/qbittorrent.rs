//! qBittorrent Web API backend (REST + session cookie).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, multipart, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::QBittorrentConfig;

use super::magnet;
use super::{RemoteClient, RemoteClientError, RemoteSession, StatusSnapshot, TorrentSource, TorrentState};

/// Connector for a qBittorrent instance.
pub struct QBittorrentClient {
    config: QBittorrentConfig,
    timeout: Duration,
}

impl QBittorrentClient {
    pub fn new(config: QBittorrentConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl RemoteClient for QBittorrentClient {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteClientError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| RemoteClientError::Unreachable(format!("http client: {e}")))?;

        let session = QBittorrentSession {
            client,
            base_url: self.config.url.trim_end_matches('/').to_string(),
            config: self.config.clone(),
            authenticated: RwLock::new(false),
        };
        session.login().await?;
        Ok(Box::new(session))
    }
}

/// Logged-in qBittorrent session. The SID cookie lives in the client's
/// cookie jar.
pub struct QBittorrentSession {
    client: Client,
    base_url: String,
    config: QBittorrentConfig,
    authenticated: RwLock<bool>,
}

impl QBittorrentSession {
    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn login(&self) -> Result<(), RemoteClientError> {
        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/api/v2/auth/login"))
            .header(header::REFERER, &self.base_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() && body.trim() == "Ok." {
            debug!("qBittorrent login successful");
            *self.authenticated.write().await = true;
            Ok(())
        } else if status == StatusCode::FORBIDDEN {
            Err(RemoteClientError::Unreachable(
                "qBittorrent login refused (too many failed attempts)".to_string(),
            ))
        } else {
            Err(RemoteClientError::Unreachable(format!(
                "qBittorrent login failed: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    /// Send a request built by `build`, logging in again once if the
    /// session cookie expired.
    async fn send<F>(&self, build: F) -> Result<String, RemoteClientError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        if !*self.authenticated.read().await {
            self.login().await?;
        }

        let mut response = build(&self.client)
            .header(header::REFERER, &self.base_url)
            .send()
            .await?;

        if response.status() == StatusCode::FORBIDDEN {
            warn!("qBittorrent session expired, re-authenticating");
            *self.authenticated.write().await = false;
            self.login().await?;
            response = build(&self.client)
                .header(header::REFERER, &self.base_url)
                .send()
                .await?;
        }

        let status = response.status();
        let body = response.text().await?;
        match status {
            s if s.is_success() => Ok(body),
            StatusCode::BAD_REQUEST | StatusCode::UNSUPPORTED_MEDIA_TYPE => Err(
                RemoteClientError::Rejected(format!("qBittorrent HTTP {status}: {}", body.trim())),
            ),
            _ => Err(RemoteClientError::Unreachable(format!(
                "qBittorrent HTTP {status}"
            ))),
        }
    }

    async fn torrents(&self, query: &[(&str, &str)]) -> Result<Vec<QbTorrent>, RemoteClientError> {
        let url = self.url("/api/v2/torrents/info");
        let body = self.send(|c| c.get(&url).query(query)).await?;
        parse_torrent_list(&body)
    }

    async fn add(&self, form: impl Fn() -> multipart::Form) -> Result<(), RemoteClientError> {
        let url = self.url("/api/v2/torrents/add");
        let body = self.send(|c| c.post(&url).multipart(form())).await?;
        if body.trim() == "Fails." {
            return Err(RemoteClientError::Rejected(
                "qBittorrent refused the torrent".to_string(),
            ));
        }
        Ok(())
    }

    fn base_form(&self) -> multipart::Form {
        let form = multipart::Form::new();
        match &self.config.download_path {
            Some(path) => form.text("savepath", path.clone()),
            None => form,
        }
    }
}

#[async_trait]
impl RemoteSession for QBittorrentSession {
    async fn submit(&self, source: &TorrentSource) -> Result<String, RemoteClientError> {
        match source {
            TorrentSource::Magnet { uri } => {
                let hash = magnet::info_hash(uri).ok_or_else(|| {
                    RemoteClientError::Rejected("magnet has no valid btih info hash".to_string())
                })?;

                match self.add(|| self.base_form().text("urls", uri.clone())).await {
                    Ok(()) => Ok(hash),
                    // qBittorrent answers "Fails." for torrents it already has
                    Err(RemoteClientError::Rejected(reason)) => {
                        if self.status(&hash).await?.is_some() {
                            debug!(hash = %hash, "qBittorrent already had the torrent");
                            Ok(hash)
                        } else {
                            Err(RemoteClientError::Rejected(reason))
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            TorrentSource::TorrentFile { filename, data } => {
                // The add endpoint does not return the hash; tag the upload
                // and look it up by tag.
                let tag = format!("seedsync-{}", uuid::Uuid::new_v4().simple());
                let file_name = filename
                    .clone()
                    .unwrap_or_else(|| "upload.torrent".to_string());

                self.add(|| {
                    let part = multipart::Part::bytes(data.clone()).file_name(file_name.clone());
                    self.base_form()
                        .part("torrents", part)
                        .text("tags", tag.clone())
                })
                .await?;

                let added = self.torrents(&[("tag", tag.as_str())]).await?;
                added
                    .into_iter()
                    .next()
                    .map(|t| t.hash.to_lowercase())
                    .ok_or_else(|| {
                        RemoteClientError::Rejected(
                            "qBittorrent accepted the upload but did not register a torrent"
                                .to_string(),
                        )
                    })
            }
        }
    }

    async fn status(&self, key: &str) -> Result<Option<StatusSnapshot>, RemoteClientError> {
        let hash = key.to_lowercase();
        let torrents = self.torrents(&[("hashes", hash.as_str())]).await?;
        Ok(torrents.into_iter().next().map(QbTorrent::into_snapshot))
    }

    async fn remove(&self, key: &str, delete_data: bool) -> Result<bool, RemoteClientError> {
        if self.status(key).await?.is_none() {
            return Ok(false);
        }

        let url = self.url("/api/v2/torrents/delete");
        let hash = key.to_lowercase();
        let delete_files = if delete_data { "true" } else { "false" };
        self.send(|c| {
            c.post(&url)
                .form(&[("hashes", hash.as_str()), ("deleteFiles", delete_files)])
        })
        .await?;
        Ok(true)
    }

    async fn close(&self) {
        let url = self.url("/api/v2/auth/logout");
        match self
            .client
            .post(&url)
            .header(header::REFERER, &self.base_url)
            .send()
            .await
        {
            Ok(_) => debug!("qBittorrent logout"),
            Err(e) => debug!(error = %e, "qBittorrent logout failed"),
        }
    }
}

/// Entry of `/api/v2/torrents/info`.
#[derive(Debug, Deserialize)]
struct QbTorrent {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    save_path: String,
}

impl QbTorrent {
    fn into_snapshot(self) -> StatusSnapshot {
        let state = parse_qb_state(&self.state);
        StatusSnapshot {
            hash: self.hash.to_lowercase(),
            name: self.name,
            error: (state == TorrentState::Error)
                .then(|| format!("qBittorrent reports state {}", self.state)),
            state,
            progress: self.progress,
            save_path: (!self.save_path.is_empty()).then_some(self.save_path),
        }
    }
}

fn parse_torrent_list(body: &str) -> Result<Vec<QbTorrent>, RemoteClientError> {
    serde_json::from_str(body).map_err(|e| {
        RemoteClientError::Unreachable(format!("unexpected qBittorrent response: {e}"))
    })
}

/// Map a qBittorrent state string.
fn parse_qb_state(state: &str) -> TorrentState {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "forcedMetaDL" | "allocating" => {
            TorrentState::Downloading
        }
        "uploading" | "forcedUP" => TorrentState::Seeding,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => TorrentState::Paused,
        "checkingDL" | "checkingUP" | "checkingResumeData" | "moving" => TorrentState::Checking,
        "queuedDL" | "queuedUP" => TorrentState::Queued,
        "stalledDL" | "stalledUP" => TorrentState::Stalled,
        "error" | "missingFiles" => TorrentState::Error,
        _ => TorrentState::Unknown,
    }
}
