//! Job administration HTTP routes.
//!
//! Provides endpoints for:
//! - Listing and inspecting jobs
//! - Creating custom jobs and editing existing ones
//! - Requesting a manual run
//! - Reading run history

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::background_jobs::{
    CreateJobRequest, ExecuteStatus, JobOperationError, SchedulerHandle, UpdateJobRequest,
};
use crate::job_store::JobFilter;
use crate::server::state::ServerState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

const MAX_HISTORY_LIMIT: usize = 500;

fn error_response(err: JobOperationError) -> Response {
    let status = match &err {
        JobOperationError::NotFound(_) => StatusCode::NOT_FOUND,
        JobOperationError::Invalid(_) => StatusCode::BAD_REQUEST,
        JobOperationError::Conflict(_) => StatusCode::CONFLICT,
        JobOperationError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        JobOperationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!("Job operation failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /v1/jobs - List jobs matching the query filters
async fn list_jobs(
    State(handle): State<SchedulerHandle>,
    Query(filter): Query<JobFilter>,
) -> Response {
    match handle.get_jobs(&filter).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/jobs - Create a custom job
async fn create_job(
    State(handle): State<SchedulerHandle>,
    Json(request): Json<CreateJobRequest>,
) -> Response {
    match handle.create_job(request).await {
        Ok(job) => {
            info!("Created job '{}' (id: {})", job.name, job.id);
            (StatusCode::CREATED, Json(job)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /v1/jobs/{id} - Job detail
async fn get_job(State(handle): State<SchedulerHandle>, Path(job_id): Path<i64>) -> Response {
    match handle.get_job(job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(JobOperationError::NotFound(job_id)),
        Err(e) => error_response(e),
    }
}

/// PUT /v1/jobs/{id} - Partial update, then reschedule
async fn update_job(
    State(handle): State<SchedulerHandle>,
    Path(job_id): Path<i64>,
    Json(request): Json<UpdateJobRequest>,
) -> Response {
    match handle.update_job(job_id, request).await {
        Ok(job) => {
            info!("Updated job '{}' (id: {})", job.name, job.id);
            Json(job).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /v1/jobs/{id}/run - Request a manual run
async fn run_job(State(handle): State<SchedulerHandle>, Path(job_id): Path<i64>) -> Response {
    match handle.execute_job(job_id).await {
        Ok(ack) => {
            let status = match ack.status {
                ExecuteStatus::Queued => StatusCode::ACCEPTED,
                ExecuteStatus::Skipped => StatusCode::OK,
            };
            (status, Json(ack)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /v1/jobs/{id}/runs - Run history, newest first
async fn list_runs(
    State(handle): State<SchedulerHandle>,
    Path(job_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.min(MAX_HISTORY_LIMIT);
    match handle.get_job_history(job_id, limit) {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Build the job routes, nested under `/v1/jobs`.
///
/// - GET / - List jobs
/// - POST / - Create a job
/// - GET /{id} - Job detail
/// - PUT /{id} - Update a job
/// - POST /{id}/run - Manual run
/// - GET /{id}/runs - Run history
pub fn jobs_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/{id}", get(get_job).put(update_job))
        .route("/{id}/run", post(run_job))
        .route("/{id}/runs", get(list_runs))
}
