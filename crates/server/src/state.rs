use std::sync::Arc;

use seedsync_core::{Authenticator, Config, JobService, JobStore, SanitizedConfig, SyncBridge};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn JobStore>,
    bridge: Arc<SyncBridge>,
    /// Absent when no torrent client is configured.
    jobs: Option<Arc<JobService>>,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn JobStore>,
        bridge: Arc<SyncBridge>,
        jobs: Option<Arc<JobService>>,
    ) -> Self {
        Self {
            config,
            authenticator,
            store,
            bridge,
            jobs,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn job_store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn bridge(&self) -> &SyncBridge {
        self.bridge.as_ref()
    }

    pub fn jobs(&self) -> Option<&Arc<JobService>> {
        self.jobs.as_ref()
    }
}
