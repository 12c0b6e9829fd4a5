use super::types::{AuthMethod, Config, NotifierBackend, TorrentClientBackend};
use super::ConfigError;

/// Validate configuration beyond what serde enforces.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().is_none_or(str::is_empty)
    {
        return Err(invalid("auth.api_key is required when auth.method = \"api_key\""));
    }

    if let Some(client) = &config.torrent_client {
        let present = match client.backend {
            TorrentClientBackend::Qbittorrent => client.qbittorrent.is_some(),
            TorrentClientBackend::Transmission => client.transmission.is_some(),
            TorrentClientBackend::Deluge => client.deluge.is_some(),
        };
        if !present {
            return Err(ConfigError::ValidationError(format!(
                "torrent_client.{} section is required for backend \"{}\"",
                client.backend.as_str(),
                client.backend.as_str()
            )));
        }
        if client.calls.timeout_secs == 0 {
            return Err(invalid("torrent_client.calls.timeout_secs must be positive"));
        }
        if client.calls.max_attempts == 0 {
            return Err(invalid("torrent_client.calls.max_attempts must be at least 1"));
        }
    }

    if config.monitor.interval_secs == 0 || config.monitor.tick_deadline_secs == 0 {
        return Err(invalid("monitor interval and tick deadline must be positive"));
    }
    if config.monitor.missing_threshold == 0 {
        return Err(invalid("monitor.missing_threshold must be at least 1"));
    }

    if config.sync.max_pending_scan == 0 {
        return Err(invalid("sync.max_pending_scan must be at least 1"));
    }

    match config.notifier.backend {
        Some(NotifierBackend::Telegram) if config.notifier.telegram.is_none() => {
            return Err(invalid("notifier.telegram section is required for backend \"telegram\""));
        }
        Some(NotifierBackend::Webhook) if config.notifier.webhook.is_none() => {
            return Err(invalid("notifier.webhook section is required for backend \"webhook\""));
        }
        _ => {}
    }
    if config.notifier.retry_interval_secs == 0 || config.notifier.sending_lease_secs == 0 {
        return Err(invalid("notifier intervals must be positive"));
    }

    if config.retention.interval_secs == 0 || config.retention.tick_deadline_secs == 0 {
        return Err(invalid("retention interval and tick deadline must be positive"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
