//! Sync agent endpoints.
//!
//! The agent polls `GET /sync/pending`, copies payloads home out of band,
//! then reports each arrival with `POST /sync/complete`. Reports may arrive
//! early, late or more than once; the bridge makes them idempotent.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use seedsync_core::{CompletionOutcome, CompletionReport, PendingWork};
use std::sync::Arc;
use tracing::debug;

use super::error::ApiError;
use super::middleware::AuthUser;
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// Body of `POST /sync/complete`.
#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub filename: String,
    pub local_path: String,
    #[serde(default)]
    pub torrent_hash: Option<String>,
}

/// Empty acknowledgement, serialized as `{}`.
#[derive(Debug, Serialize)]
pub struct Ack {}

// ============================================================================
// Handlers
// ============================================================================

pub async fn pending(State(state): State<Arc<AppState>>) -> Result<Json<PendingWork>, ApiError> {
    Ok(Json(state.bridge().pending_work()?))
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    body: Result<Json<CompleteBody>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    debug!(caller = %caller, "Completion report '{}'", body.filename);

    let mut report = CompletionReport::new(body.filename, body.local_path);
    if let Some(hash) = body.torrent_hash.filter(|h| !h.trim().is_empty()) {
        report = report.with_hash(hash);
    }
    let filename = report.filename.clone();

    match state.bridge().complete(report).await? {
        CompletionOutcome::Synced { .. } | CompletionOutcome::AlreadyApplied { .. } => {
            Ok(Json(Ack {}))
        }
        CompletionOutcome::Unresolved { attempts, .. } => Err(ApiError::not_found(format!(
            "no sync_pending job matches '{filename}' (attempt {attempts})"
        ))),
    }
}
