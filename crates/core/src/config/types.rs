use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Remote torrent client. Without it the server only answers the sync
    /// bridge and read-only job queries.
    #[serde(default)]
    pub torrent_client: Option<TorrentClientConfig>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Shared secret presented by the sync agent and API callers.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("seedsync.db")
}

/// Torrent client configuration. Exactly one backend is active per process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentClientConfig {
    pub backend: TorrentClientBackend,
    #[serde(default)]
    pub qbittorrent: Option<QBittorrentConfig>,
    #[serde(default)]
    pub transmission: Option<TransmissionConfig>,
    #[serde(default)]
    pub deluge: Option<DelugeConfig>,
    #[serde(default)]
    pub calls: RemoteCallConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TorrentClientBackend {
    Qbittorrent,
    Transmission,
    Deluge,
}

impl TorrentClientBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentClientBackend::Qbittorrent => "qbittorrent",
            TorrentClientBackend::Transmission => "transmission",
            TorrentClientBackend::Deluge => "deluge",
        }
    }
}

/// qBittorrent Web API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QBittorrentConfig {
    /// Web UI URL (e.g., "http://localhost:8080")
    pub url: String,
    pub username: String,
    pub password: String,
    /// Save path override passed on add
    #[serde(default)]
    pub download_path: Option<String>,
}

/// Transmission RPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransmissionConfig {
    /// Base URL (e.g., "http://localhost:9091")
    pub url: String,
    #[serde(default = "default_transmission_rpc_path")]
    pub rpc_path: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
}

fn default_transmission_rpc_path() -> String {
    "/transmission/rpc".to_string()
}

/// Deluge configuration (deluge-web JSON gateway in front of the daemon)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelugeConfig {
    /// deluge-web URL (e.g., "http://localhost:8112")
    pub url: String,
    pub password: String,
    #[serde(default = "default_deluge_api_path")]
    pub api_path: String,
    #[serde(default)]
    pub download_location: Option<String>,
}

fn default_deluge_api_path() -> String {
    "/json".to_string()
}

/// Timeout and retry policy applied to every backend call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteCallConfig {
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RemoteCallConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_call_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

/// Acquisition monitor schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    /// Hard limit for a single tick; on expiry the tick is abandoned.
    #[serde(default = "default_monitor_deadline_secs")]
    pub tick_deadline_secs: u64,
    /// Consecutive ticks a torrent may be absent before its job fails.
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            tick_deadline_secs: default_monitor_deadline_secs(),
            missing_threshold: default_missing_threshold(),
        }
    }
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_monitor_deadline_secs() -> u64 {
    50
}

fn default_missing_threshold() -> u32 {
    3
}

/// Sync bridge reconciliation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Upper bound on `sync_pending` jobs scanned per completion report.
    #[serde(default = "default_max_pending_scan")]
    pub max_pending_scan: usize,
    /// Attempts after which an unresolved report is logged as permanent.
    #[serde(default = "default_unresolved_warn_after")]
    pub unresolved_warn_after: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pending_scan: default_max_pending_scan(),
            unresolved_warn_after: default_unresolved_warn_after(),
        }
    }
}

fn default_max_pending_scan() -> usize {
    200
}

fn default_unresolved_warn_after() -> u32 {
    3
}

/// User notification delivery. With no backend, messages stay pending in
/// the outbox until one is configured.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub backend: Option<NotifierBackend>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// How long a claimed message may stay in `sending` before the sweep
    /// hands it back to `pending`.
    #[serde(default = "default_sending_lease_secs")]
    pub sending_lease_secs: u64,
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            backend: None,
            telegram: None,
            webhook: None,
            retry_interval_secs: default_retry_interval_secs(),
            sending_lease_secs: default_sending_lease_secs(),
            timeout_secs: default_notifier_timeout_secs(),
        }
    }
}

fn default_retry_interval_secs() -> u64 {
    120
}

fn default_sending_lease_secs() -> u64 {
    300
}

fn default_notifier_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifierBackend {
    Telegram,
    Webhook,
}

/// Telegram Bot API sender
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

/// Generic JSON webhook sender
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Retention sweep for finished jobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_retention_deadline_secs")]
    pub tick_deadline_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Also delete downloaded data when removing the torrent.
    #[serde(default)]
    pub delete_data: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_retention_interval_secs(),
            tick_deadline_secs: default_retention_deadline_secs(),
            retention_days: default_retention_days(),
            delete_data: false,
        }
    }
}

fn default_retention_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_retention_deadline_secs() -> u64 {
    600
}

fn default_retention_days() -> u32 {
    7
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torrent_client: Option<SanitizedTorrentClientConfig>,
    pub monitor: MonitorConfig,
    pub sync: SyncConfig,
    pub notifier: SanitizedNotifierConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTorrentClientConfig {
    pub backend: String,
    pub url: Option<String>,
    pub calls: RemoteCallConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotifierConfig {
    pub backend: Option<String>,
    pub retry_interval_secs: u64,
    pub sending_lease_secs: u64,
}

impl TorrentClientConfig {
    /// URL of the active backend, if its sub-table is present.
    pub fn active_url(&self) -> Option<&str> {
        match self.backend {
            TorrentClientBackend::Qbittorrent => self.qbittorrent.as_ref().map(|c| c.url.as_str()),
            TorrentClientBackend::Transmission => {
                self.transmission.as_ref().map(|c| c.url.as_str())
            }
            TorrentClientBackend::Deluge => self.deluge.as_ref().map(|c| c.url.as_str()),
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::None => "none".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                api_key_configured: config
                    .auth
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            torrent_client: config
                .torrent_client
                .as_ref()
                .map(|c| SanitizedTorrentClientConfig {
                    backend: c.backend.as_str().to_string(),
                    url: c.active_url().map(str::to_string),
                    calls: c.calls.clone(),
                }),
            monitor: config.monitor.clone(),
            sync: config.sync.clone(),
            notifier: SanitizedNotifierConfig {
                backend: config.notifier.backend.map(|b| match b {
                    NotifierBackend::Telegram => "telegram".to_string(),
                    NotifierBackend::Webhook => "webhook".to_string(),
                }),
                retry_interval_secs: config.notifier.retry_interval_secs,
                sending_lease_secs: config.notifier.sending_lease_secs,
            },
            retention: config.retention.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml = r#"
[auth]
method = "none"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.monitor.interval_secs, 60);
        assert_eq!(config.monitor.missing_threshold, 3);
        assert_eq!(config.sync.max_pending_scan, 200);
        assert_eq!(config.sync.unresolved_warn_after, 3);
        assert_eq!(config.notifier.sending_lease_secs, 300);
        assert_eq!(config.retention.retention_days, 7);
        assert!(config.torrent_client.is_none());
        assert!(config.notifier.backend.is_none());
    }

    #[test]
    fn test_deserialize_missing_auth_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_qbittorrent_backend() {
        let toml = r#"
[auth]
method = "api_key"
api_key = "secret"

[torrent_client]
backend = "qbittorrent"

[torrent_client.qbittorrent]
url = "http://localhost:8080"
username = "admin"
password = "adminadmin"

[torrent_client.calls]
timeout_secs = 5
max_attempts = 4
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let client = config.torrent_client.unwrap();
        assert_eq!(client.backend, TorrentClientBackend::Qbittorrent);
        assert_eq!(client.active_url(), Some("http://localhost:8080"));
        assert_eq!(client.calls.timeout_secs, 5);
        assert_eq!(client.calls.max_attempts, 4);
        assert_eq!(client.calls.initial_backoff_ms, 500);
    }

    #[test]
    fn test_deserialize_deluge_defaults() {
        let toml = r#"
[auth]
method = "none"

[torrent_client]
backend = "deluge"

[torrent_client.deluge]
url = "http://seedbox:8112"
password = "deluge"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let deluge = config.torrent_client.unwrap().deluge.unwrap();
        assert_eq!(deluge.api_path, "/json");
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let toml = r#"
[auth]
method = "api_key"
api_key = "super-secret"

[torrent_client]
backend = "deluge"

[torrent_client.deluge]
url = "http://seedbox:8112"
password = "hunter2"

[notifier]
backend = "telegram"

[notifier.telegram]
bot_token = "123:abc"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();

        assert!(sanitized.auth.api_key_configured);
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("123:abc"));
        assert_eq!(sanitized.notifier.backend.as_deref(), Some("telegram"));
        assert_eq!(
            sanitized.torrent_client.unwrap().url.as_deref(),
            Some("http://seedbox:8112")
        );
    }
}
