use crate::background_jobs::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Persisted record of one job execution.
///
/// Created as `pending` when a run is triggered and moved to a terminal
/// status once the worker finishes.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Terminal outcome written by [`ExecutionStore::complete_execution`](super::ExecutionStore::complete_execution).
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub duration_ms: i64,
}
