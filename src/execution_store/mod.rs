mod models;
mod schema;
mod sqlite_execution_store;

pub use models::{ExecutionOutcome, JobExecution};
pub use schema::EXECUTION_VERSIONED_SCHEMAS;
pub use sqlite_execution_store::SqliteExecutionStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Slack added to the longest job timeout before an unfinished execution is
/// considered abandoned.
pub const STALE_EXECUTION_GRACE: Duration = Duration::from_secs(10 * 60);

/// Persistence of job execution history.
pub trait ExecutionStore: Send + Sync {
    /// Insert a new `pending` execution.
    fn create_execution(&self, job_name: &str) -> Result<JobExecution>;
    fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<()>;
    fn complete_execution(&self, id: Uuid, outcome: &ExecutionOutcome) -> Result<()>;
    fn get_execution(&self, id: Uuid) -> Result<Option<JobExecution>>;
    fn get_latest_execution(&self, job_name: &str) -> Result<Option<JobExecution>>;
    /// Most recent executions of a job, newest first.
    fn get_job_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>>;
    /// Fail executions still pending or running that were last touched before
    /// `older_than`. Rows newer than that may belong to a live peer process
    /// sharing the database and are left alone.
    fn mark_stale_executions_failed(&self, older_than: DateTime<Utc>) -> Result<usize>;
    fn delete_executions_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
