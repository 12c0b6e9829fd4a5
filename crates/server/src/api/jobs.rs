//! Job intake and query endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use seedsync_core::{
    AcquisitionJob, CreateJobRequest, JobFilter, JobStatus, TorrentSource,
};
use std::sync::Arc;
use tracing::info;

use super::error::ApiError;
use super::middleware::AuthUser;
use crate::state::AppState;

/// Maximum limit for list queries
const MAX_LIMIT: i64 = 1000;
/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response types
// ============================================================================

/// Body of `POST /api/v1/jobs`. Exactly one of `magnet` and
/// `torrent_base64` must be set.
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub display_name: String,
    pub owner: String,
    #[serde(default)]
    pub magnet: Option<String>,
    #[serde(default)]
    pub torrent_base64: Option<String>,
    #[serde(default)]
    pub torrent_filename: Option<String>,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub owner: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A job as returned by the API. The torrent payload is summarized, not
/// echoed back.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub display_name: String,
    pub owner: String,
    pub status: JobStatus,
    pub source: String,
    pub correlation_key: Option<String>,
    pub progress: f64,
    pub hint_path: Option<String>,
    pub destination_path: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status_updated_at: DateTime<Utc>,
}

impl From<AcquisitionJob> for JobResponse {
    fn from(job: AcquisitionJob) -> Self {
        Self {
            source: job.source.describe(),
            id: job.id,
            display_name: job.display_name,
            owner: job.owner,
            status: job.status,
            correlation_key: job.correlation_key,
            progress: job.progress,
            hint_path: job.hint_path,
            destination_path: job.destination_path,
            last_error: job.last_error,
            created_at: job.created_at,
            status_updated_at: job.status_updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a job and submit it to the torrent client.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    body: Result<Json<CreateJobBody>, JsonRejection>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let Some(service) = state.jobs() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "no torrent client configured",
        ));
    };

    let request = parse_create_body(body)?;
    info!(caller = %caller, "Job requested for '{}'", request.display_name);

    let job = service.request_download(request).await?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

fn parse_create_body(body: CreateJobBody) -> Result<CreateJobRequest, ApiError> {
    let display_name = body.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ApiError::bad_request("display_name is required"));
    }
    let owner = body.owner.trim().to_string();
    if owner.is_empty() {
        return Err(ApiError::bad_request("owner is required"));
    }

    let source = match (body.magnet, body.torrent_base64) {
        (Some(uri), None) => {
            if !uri.trim_start().starts_with("magnet:") {
                return Err(ApiError::bad_request("magnet must be a magnet: URI"));
            }
            TorrentSource::magnet(uri.trim())
        }
        (None, Some(encoded)) => {
            let data = STANDARD
                .decode(encoded.trim())
                .map_err(|e| ApiError::bad_request(format!("torrent_base64 is not valid base64: {e}")))?;
            if data.is_empty() {
                return Err(ApiError::bad_request("torrent file is empty"));
            }
            TorrentSource::torrent_file(body.torrent_filename, data)
        }
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of magnet or torrent_base64 is required",
            ))
        }
    };

    Ok(CreateJobRequest {
        display_name,
        source,
        owner,
    })
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    match state.job_store().get(&id)? {
        Some(job) => Ok(Json(JobResponse::from(job))),
        None => Err(ApiError::not_found(format!("Job not found: {}", id))),
    }
}

/// List jobs with optional filters, most recently changed first.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        let status: JobStatus = status
            .parse()
            .map_err(|_| ApiError::bad_request(format!("unknown status: {status}")))?;
        filter = filter.with_status(status);
    }

    if let Some(ref owner) = params.owner {
        filter = filter.with_owner(owner);
    }

    let jobs = state.job_store().list(&filter)?;

    // Total ignores pagination
    let count_filter = JobFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };
    let total = state.job_store().count(&count_filter)?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}
