use super::models::{ExecutionOutcome, JobExecution};
use super::schema::EXECUTION_VERSIONED_SCHEMAS;
use super::ExecutionStore;
use crate::background_jobs::ExecutionStatus;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const STALE_EXECUTION_ERROR: &str = "interrupted by server restart";

const SELECT_COLUMNS: &str =
    "id, job_name, status, started_at, completed_at, error, result, duration_ms, created_at";

pub struct SqliteExecutionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let mut conn = Connection::open(path).context("Failed to open execution database")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        open_versioned(&mut conn, EXECUTION_VERSIONED_SCHEMAS)
            .with_context(|| format!("Failed to prepare execution database at {:?}", path))?;
        info!("Execution history database ready at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fixed-width UTC timestamps so that text ordering matches time ordering.
    fn format_datetime(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<JobExecution> {
        let id_str: String = row.get("id")?;
        let status_str: String = row.get("status")?;
        let started_at: Option<String> = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        let result: Option<String> = row.get("result")?;
        let created_at: String = row.get("created_at")?;

        Ok(JobExecution {
            id: Uuid::parse_str(&id_str).unwrap_or_default(),
            job_name: row.get("job_name")?,
            status: ExecutionStatus::parse(&status_str).unwrap_or(ExecutionStatus::Failed),
            started_at: started_at.as_deref().and_then(Self::parse_datetime),
            completed_at: completed_at.as_deref().and_then(Self::parse_datetime),
            error: row.get("error")?,
            result: result.and_then(|s| serde_json::from_str(&s).ok()),
            duration_ms: row.get("duration_ms")?,
            created_at: Self::parse_datetime(&created_at).unwrap_or_else(Utc::now),
        })
    }
}

impl ExecutionStore for SqliteExecutionStore {
    fn create_execution(&self, job_name: &str) -> Result<JobExecution> {
        let execution = JobExecution {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            duration_ms: None,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO job_executions (id, job_name, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                execution.id.to_string(),
                execution.job_name,
                execution.status.as_str(),
                Self::format_datetime(execution.created_at),
            ],
        )?;
        Ok(execution)
    }

    fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE job_executions SET status = ?1, started_at = ?2 WHERE id = ?3",
            params![
                ExecutionStatus::Running.as_str(),
                Self::format_datetime(started_at),
                id.to_string()
            ],
        )?;
        Ok(())
    }

    fn complete_execution(&self, id: Uuid, outcome: &ExecutionOutcome) -> Result<()> {
        let result_json = outcome
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn().execute(
            "UPDATE job_executions
             SET status = ?1, completed_at = ?2, error = ?3, result = ?4, duration_ms = ?5
             WHERE id = ?6",
            params![
                outcome.status.as_str(),
                Self::format_datetime(Utc::now()),
                outcome.error,
                result_json,
                outcome.duration_ms,
                id.to_string()
            ],
        )?;
        Ok(())
    }

    fn get_execution(&self, id: Uuid) -> Result<Option<JobExecution>> {
        let conn = self.conn();
        let execution = conn
            .query_row(
                &format!("SELECT {} FROM job_executions WHERE id = ?1", SELECT_COLUMNS),
                params![id.to_string()],
                Self::row_to_execution,
            )
            .optional()?;
        Ok(execution)
    }

    fn get_latest_execution(&self, job_name: &str) -> Result<Option<JobExecution>> {
        Ok(self.get_job_history(job_name, 1)?.into_iter().next())
    }

    fn get_job_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_executions WHERE job_name = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            SELECT_COLUMNS
        ))?;
        let executions = stmt
            .query_map(params![job_name, limit as i64], Self::row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    fn mark_stale_executions_failed(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let count = self.conn().execute(
            "UPDATE job_executions SET status = ?1, error = ?2, completed_at = ?3
             WHERE status IN (?4, ?5) AND COALESCE(started_at, created_at) < ?6",
            params![
                ExecutionStatus::Failed.as_str(),
                STALE_EXECUTION_ERROR,
                Self::format_datetime(Utc::now()),
                ExecutionStatus::Pending.as_str(),
                ExecutionStatus::Running.as_str(),
                Self::format_datetime(older_than),
            ],
        )?;
        Ok(count)
    }

    fn delete_executions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let count = self.conn().execute(
            "DELETE FROM job_executions WHERE created_at < ?1",
            params![Self::format_datetime(cutoff)],
        )?;
        Ok(count)
    }
}
