//! HTTP request handlers
//!
//! Implements handlers for the split, health, version and debug endpoints.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::upload::save_upload;
use crate::error::SplitError;
use crate::state::{AppState, JobInfo};

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Unauthorized,
    PayloadTooLarge(String),
    InternalError(String),
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HttpError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            HttpError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            HttpError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m),
            HttpError::InternalError(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<SplitError> for HttpError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::MissingUpload | SplitError::InvalidUpload(_) => {
                HttpError::BadRequest(err.to_string())
            }
            SplitError::UploadTooLarge => HttpError::PayloadTooLarge(err.to_string()),
            _ => HttpError::InternalError(err.to_string()),
        }
    }
}

/// Query parameter carrying the requested segment length
pub const SEGMENT_SECONDS_PARAM: &str = "segmentSeconds";

/// Raw segment length from the query pairs; the first occurrence wins.
///
/// Planning and clamping happen in the pipeline, so a repeated or malformed
/// value never fails the request here.
pub fn segment_seconds_param(pairs: &[(String, String)]) -> Option<&str> {
    pairs
        .iter()
        .find(|(key, _)| key == SEGMENT_SECONDS_PARAM)
        .map(|(_, value)| value.as_str())
}

/// Health check endpoint
/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Version information endpoint
/// GET /version
pub async fn version_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Split an uploaded file into segments
/// POST /split?segmentSeconds=N  (multipart field `file`)
pub async fn split(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Vec<(String, String)>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, HttpError> {
    // A body that is not multipart at all simply carries no upload
    let upload = match multipart {
        Ok(mut multipart) => {
            let max_bytes = state.config.limits.max_upload_bytes() as u64;
            save_upload(&mut multipart, &state.config.temp_dir, max_bytes).await?
        }
        Err(rejection) => {
            tracing::debug!("No multipart body: {}", rejection);
            None
        }
    };

    let output = state
        .pipeline
        .run(upload, segment_seconds_param(&query), &state.jobs)
        .await
        .map_err(|e| {
            tracing::warn!("Split request failed: {}", e);
            HttpError::from(e)
        })?;

    tracing::info!(
        "Job {}: sending {} segment(s) of {}s",
        output.job_id,
        output.segment_count,
        output.segment_seconds
    );
    Ok(output.into_response())
}

/// Active jobs response
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub count: usize,
    pub jobs: Vec<JobInfo>,
}

/// Jobs currently holding a workspace
/// GET /debug/jobs
pub async fn active_jobs(State(state): State<Arc<AppState>>) -> Json<JobListResponse> {
    let jobs = state.jobs.list();
    Json(JobListResponse {
        count: jobs.len(),
        jobs,
    })
}
