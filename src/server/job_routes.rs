//! Background job HTTP routes.
//!
//! Provides endpoints for:
//! - Listing registered jobs with their schedule and metrics
//! - Inspecting one job and its execution history
//! - Triggering a job by name

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::background_jobs::{
    JobInfo, JobMetrics, JobService, TriggerError, DEFAULT_HISTORY_LIMIT,
};
use crate::execution_store::JobExecution;
use crate::server::auth::AuthUser;
use crate::server::state::ServerState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobInfo>,
}

#[derive(Debug, Serialize)]
pub struct JobMetricsResponse {
    pub metrics: Vec<JobMetrics>,
}

#[derive(Debug, Serialize)]
pub struct JobHistoryResponse {
    pub job_name: String,
    pub executions: Vec<JobExecution>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub execution_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /v1/jobs
async fn list_jobs(_user: AuthUser, State(jobs): State<JobService>) -> impl IntoResponse {
    Json(JobListResponse {
        jobs: jobs.list_jobs(),
    })
}

/// GET /v1/jobs/metrics
async fn get_metrics(_user: AuthUser, State(jobs): State<JobService>) -> impl IntoResponse {
    Json(JobMetricsResponse {
        metrics: jobs.get_all_metrics(),
    })
}

/// GET /v1/jobs/{name}
async fn get_job(
    _user: AuthUser,
    State(jobs): State<JobService>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match jobs.get_job_status(&name) {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Job not found: {}", name)),
        Err(e) => {
            warn!("Failed to load status of job {}: {:#}", name, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load job status")
        }
    }
}

/// GET /v1/jobs/{name}/history?limit=N
async fn get_job_history(
    _user: AuthUser,
    State(jobs): State<JobService>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match jobs.get_job_history(&name, Some(query.limit)) {
        Ok(Some(executions)) => Json(JobHistoryResponse {
            job_name: name,
            executions,
        })
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Job not found: {}", name)),
        Err(e) => {
            warn!("Failed to load history of job {}: {:#}", name, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load job history")
        }
    }
}

/// POST /v1/jobs/{name}/trigger
///
/// Answers 202 as soon as the job is queued; the outcome shows up in the
/// job's status and history.
async fn trigger_job(
    user: AuthUser,
    State(jobs): State<JobService>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match jobs.trigger_job(&name) {
        Ok(execution) => {
            info!(
                "User {} triggered job {} (execution {})",
                user.user_id, name, execution.id
            );
            (
                StatusCode::ACCEPTED,
                Json(TriggerResponse {
                    execution_id: execution.id,
                    status: execution.status.as_str().to_string(),
                }),
            )
                .into_response()
        }
        Err(TriggerError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, format!("Job not found: {}", name))
        }
        Err(TriggerError::Rejected(e)) => {
            warn!("Trigger of job {} rejected: {}", name, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(TriggerError::Store(e)) => {
            warn!("Failed to record execution of job {}: {:#}", name, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to record job execution",
            )
        }
    }
}

pub fn job_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/metrics", get(get_metrics))
        .route("/{name}", get(get_job))
        .route("/{name}/history", get(get_job_history))
        .route("/{name}/trigger", post(trigger_job))
}
