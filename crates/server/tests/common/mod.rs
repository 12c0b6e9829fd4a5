//! In-process server fixture with mock torrent client and notifier.
//!
//! The router is driven with `tower::ServiceExt::oneshot`; no port is
//! bound. Jobs are advanced by ticking the monitor directly.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use seedsync_core::testing::{MockNotifier, MockRemoteClient};
use seedsync_core::{
    create_authenticator, load_config_from_str, AcquisitionMonitor, CallPolicy, JobLocks,
    JobService, JobStore, NotificationDispatcher, SqliteJobStore, SqliteOutbox, SqliteReportLog,
    SyncBridge,
};
use seedsync_server::api::create_router;
use seedsync_server::state::AppState;

pub const API_KEY: &str = "agent-secret";

/// Test fixture with a file-backed database in a temp dir.
pub struct TestFixture {
    pub router: Router,
    pub store: Arc<SqliteJobStore>,
    pub client: Arc<MockRemoteClient>,
    pub notifier: Arc<MockNotifier>,
    pub monitor: Arc<AcquisitionMonitor>,
    /// Attached to every request unless the `*_anonymous` helpers are used.
    api_key: Option<String>,
    _temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture with `auth.method = "none"`.
    pub fn new() -> Self {
        Self::build("[auth]\nmethod = \"none\"\n", None)
    }

    /// Fixture requiring the shared secret [`API_KEY`].
    pub fn with_api_key() -> Self {
        let toml = format!("[auth]\nmethod = \"api_key\"\napi_key = \"{API_KEY}\"\n");
        Self::build(&toml, Some(API_KEY.to_string()))
    }

    fn build(toml: &str, api_key: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = load_config_from_str(toml).expect("valid test config");
        config.database.path = db_path.clone();

        let store = Arc::new(SqliteJobStore::new(&db_path).expect("job store"));
        let outbox = Arc::new(SqliteOutbox::new(&db_path).expect("outbox"));
        let reports = Arc::new(SqliteReportLog::new(&db_path).expect("report log"));
        let client = Arc::new(MockRemoteClient::new());
        let notifier = Arc::new(MockNotifier::new());
        let locks = JobLocks::new();

        let dispatcher = Arc::new(NotificationDispatcher::new(
            outbox,
            store.clone(),
            Some(notifier.clone()),
            locks.clone(),
        ));
        let service = Arc::new(JobService::new(
            store.clone(),
            client.clone(),
            dispatcher.clone(),
            locks.clone(),
            CallPolicy::immediate(Duration::from_secs(2)),
        ));
        let monitor = Arc::new(AcquisitionMonitor::new(service.clone(), 3));
        let bridge = Arc::new(SyncBridge::new(
            store.clone(),
            reports,
            dispatcher,
            locks,
            config.sync.clone(),
        ));

        let authenticator = Arc::from(create_authenticator(&config.auth).expect("authenticator"));
        let state = Arc::new(AppState::new(
            config,
            authenticator,
            store.clone() as Arc<dyn JobStore>,
            bridge,
            Some(service),
        ));

        Self {
            router: create_router(state),
            store,
            client,
            notifier,
            monitor,
            api_key,
            _temp_dir: temp_dir,
        }
    }

    /// Create a job from a magnet link via the API and return its id.
    pub async fn create_magnet_job(&self, display_name: &str, hash: &str, dn: &str) -> String {
        let response = self
            .post(
                "/api/v1/jobs",
                serde_json::json!({
                    "display_name": display_name,
                    "owner": "1001",
                    "magnet": format!("magnet:?xt=urn:btih:{hash}&dn={dn}"),
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"]
            .as_str()
            .expect("job id in response")
            .to_string()
    }

    /// Finish the download on the mock backend and tick the monitor so the
    /// job lands in `sync_pending`.
    pub async fn finish_download(&self, hash: &str) {
        self.client.set_progress(hash, 1.0);
        self.monitor.tick().await.expect("monitor tick");
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.send("GET", path, None, self.api_key.as_deref()).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        let body = serde_json::to_string(&body).expect("serializable body");
        self.send("POST", path, Some(body), self.api_key.as_deref())
            .await
    }

    /// POST a raw string body (for malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.send("POST", path, Some(body.to_string()), self.api_key.as_deref())
            .await
    }

    pub async fn get_anonymous(&self, path: &str) -> TestResponse {
        self.send("GET", path, None, None).await
    }

    pub async fn post_anonymous(&self, path: &str, body: Value) -> TestResponse {
        let body = serde_json::to_string(&body).expect("serializable body");
        self.send("POST", path, Some(body), None).await
    }

    /// GET a non-JSON endpoint without credentials.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Send with an arbitrary header and no default credentials.
    pub async fn post_with_header(
        &self,
        path: &str,
        body: Value,
        header: (&str, &str),
    ) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .header(header.0, header.1)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.dispatch(request).await
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
        api_key: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(key) = api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let body = match body {
            Some(body) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(body)
            }
            None => Body::empty(),
        };
        self.dispatch(builder.body(body).unwrap()).await
    }

    async fn dispatch(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
