//! Job intake and query endpoints.

mod common;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use common::TestFixture;

const DUNE_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

#[tokio::test]
async fn test_health_is_public() {
    let fixture = TestFixture::with_api_key();

    let response = fixture.get_anonymous("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_is_sanitized_and_protected() {
    let fixture = TestFixture::with_api_key();

    assert_status!(
        fixture.get_anonymous("/api/v1/config").await,
        StatusCode::UNAUTHORIZED
    );

    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["auth"]["method"], "api_key");
    assert_eq!(response.body["auth"]["api_key_configured"], true);
    assert!(!response.body.to_string().contains(common::API_KEY));
}

#[tokio::test]
async fn test_create_magnet_job_submits_to_backend() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({
                "display_name": "Dune",
                "owner": "1001",
                "magnet": format!("magnet:?xt=urn:btih:{DUNE_HASH}&dn=Dune.2021"),
            }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["display_name"], "Dune");
    assert_eq!(response.body["status"], "downloading");
    assert_eq!(response.body["correlation_key"], DUNE_HASH);
    assert!(fixture.client.contains(DUNE_HASH));
}

#[tokio::test]
async fn test_create_torrent_file_job() {
    let fixture = TestFixture::new();
    let encoded = STANDARD.encode(b"d8:announce3:url4:infod4:name4:Dunee");

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({
                "display_name": "Dune",
                "owner": "1001",
                "torrent_base64": encoded,
                "torrent_filename": "Dune.torrent",
            }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["status"], "downloading");
    assert!(response.body["source"]
        .as_str()
        .unwrap()
        .starts_with("torrent file Dune.torrent"));
}

#[tokio::test]
async fn test_unreachable_backend_leaves_job_queued() {
    let fixture = TestFixture::new();
    fixture.client.set_unreachable(true);

    let id = fixture.create_magnet_job("Dune", DUNE_HASH, "Dune").await;
    let job = fixture.get(&format!("/api/v1/jobs/{id}")).await;
    assert_eq!(job.body["status"], "queued");
    assert!(job.body["correlation_key"].is_null());
}

#[tokio::test]
async fn test_duplicate_active_request_is_409() {
    let fixture = TestFixture::new();
    fixture.create_magnet_job("Dune", DUNE_HASH, "Dune").await;

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({
                "display_name": "dune",
                "owner": "1001",
                "magnet": format!("magnet:?xt=urn:btih:{DUNE_HASH}"),
            }),
        )
        .await;
    assert_status!(response, StatusCode::CONFLICT);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_create_requires_exactly_one_source() {
    let fixture = TestFixture::new();

    let none = fixture
        .post("/api/v1/jobs", json!({"display_name": "Dune", "owner": "1001"}))
        .await;
    assert_status!(none, StatusCode::BAD_REQUEST);

    let both = fixture
        .post(
            "/api/v1/jobs",
            json!({
                "display_name": "Dune",
                "owner": "1001",
                "magnet": format!("magnet:?xt=urn:btih:{DUNE_HASH}"),
                "torrent_base64": "AAAA",
            }),
        )
        .await;
    assert_status!(both, StatusCode::BAD_REQUEST);

    let malformed = fixture.post_raw("/api/v1/jobs", "{\"display_name\":").await;
    assert_status!(malformed, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/jobs/does-not-exist").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn test_list_filters_by_status_and_owner() {
    let fixture = TestFixture::new();
    fixture.create_magnet_job("Dune", DUNE_HASH, "Dune").await;
    fixture.client.set_unreachable(true);
    fixture
        .create_magnet_job("Arrival", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "Arrival")
        .await;

    let all = fixture.get("/api/v1/jobs").await;
    assert_status!(all, StatusCode::OK);
    assert_eq!(all.body["total"], 2);
    assert_eq!(all.body["limit"], 100);
    assert_eq!(all.body["offset"], 0);

    let queued = fixture.get("/api/v1/jobs?status=queued").await;
    assert_eq!(queued.body["total"], 1);
    assert_eq!(queued.body["jobs"][0]["display_name"], "Arrival");

    let someone_else = fixture.get("/api/v1/jobs?owner=2002").await;
    assert_eq!(someone_else.body["total"], 0);

    let paged = fixture.get("/api/v1/jobs?limit=1&offset=1").await;
    assert_eq!(paged.body["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(paged.body["total"], 2);

    let bad = fixture.get("/api/v1/jobs?status=teleported").await;
    assert_status!(bad, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let fixture = TestFixture::new();
    fixture.get("/api/v1/health").await;

    let (status, text) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("seedsync_http_requests_total"));
    assert!(text.contains("# TYPE"));
}
