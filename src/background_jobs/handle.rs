use super::job::{ExecutionStatus, Job, RetryPolicy};
use super::monitor::{JobMetrics, Monitor};
use super::scheduler::{Scheduler, SchedulerError};
use super::worker_pool::SubmitError;
use crate::execution_store::{ExecutionOutcome, ExecutionStore, JobExecution};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub timeout_secs: u64,
    pub retry_policy: RetryPolicy,
    pub lockable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<u64>,
    pub metrics: Option<JobMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub job: JobInfo,
    pub last_execution: Option<JobExecution>,
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Rejected(#[from] SubmitError),
    #[error("Failed to record execution: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Facade over scheduler, monitor and execution history used by HTTP handlers.
#[derive(Clone)]
pub struct JobService {
    scheduler: Arc<Scheduler>,
    monitor: Arc<Monitor>,
    store: Arc<dyn ExecutionStore>,
}

impl JobService {
    pub fn new(
        scheduler: Arc<Scheduler>,
        monitor: Arc<Monitor>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            scheduler,
            monitor,
            store,
        }
    }

    /// Get information about all registered jobs, sorted by name.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.scheduler
            .list_jobs()
            .iter()
            .map(|job| self.job_info(job.as_ref()))
            .collect()
    }

    /// Get a job's description together with its latest execution.
    pub fn get_job_status(&self, name: &str) -> Result<Option<JobStatus>> {
        let job = match self.scheduler.get_job(name) {
            Ok(job) => job,
            Err(_) => return Ok(None),
        };
        let last_execution = self.store.get_latest_execution(name)?;
        Ok(Some(JobStatus {
            job: self.job_info(job.as_ref()),
            last_execution,
        }))
    }

    /// Recent executions of a job, newest first. `None` for unknown jobs.
    ///
    /// `limit` defaults to [`DEFAULT_HISTORY_LIMIT`] and is capped at [`MAX_HISTORY_LIMIT`].
    pub fn get_job_history(
        &self,
        name: &str,
        limit: Option<usize>,
    ) -> Result<Option<Vec<JobExecution>>> {
        if self.scheduler.get_job(name).is_err() {
            return Ok(None);
        }
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(Some(self.store.get_job_history(name, limit)?))
    }

    /// Queue a job and return its pending execution record right away.
    ///
    /// The outcome is only observable later through status or history.
    pub fn trigger_job(&self, name: &str) -> Result<JobExecution, TriggerError> {
        if self.scheduler.get_job(name).is_err() {
            return Err(TriggerError::NotFound(name.to_string()));
        }

        let execution = self.store.create_execution(name)?;
        match self.scheduler.trigger_job_tracked(name, execution.id) {
            Ok(()) => {
                info!("Job {} accepted as execution {}", name, execution.id);
                Ok(execution)
            }
            Err(SchedulerError::Submit(e)) => {
                self.reject_execution(execution.id, &e.to_string());
                Err(TriggerError::Rejected(e))
            }
            Err(e) => {
                self.reject_execution(execution.id, &e.to_string());
                Err(TriggerError::NotFound(name.to_string()))
            }
        }
    }

    pub fn get_execution(&self, id: Uuid) -> Result<Option<JobExecution>> {
        self.store.get_execution(id)
    }

    pub fn get_all_metrics(&self) -> Vec<JobMetrics> {
        self.monitor.get_all_metrics()
    }

    fn reject_execution(&self, id: Uuid, reason: &str) {
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Failed,
            error: Some(reason.to_string()),
            result: None,
            duration_ms: 0,
        };
        if let Err(e) = self.store.complete_execution(id, &outcome) {
            error!("Failed to mark rejected execution {} as failed: {:#}", id, e);
        }
    }

    fn job_info(&self, job: &dyn Job) -> JobInfo {
        let name = job.name().to_string();
        let schedule = Some(job.schedule().trim().to_string()).filter(|s| !s.is_empty());
        JobInfo {
            next_run_at: self.scheduler.next_run(&name),
            metrics: self.monitor.get_metrics(&name),
            schedule,
            timeout_secs: job.timeout().as_secs(),
            retry_policy: job.retry_policy(),
            lockable: job.as_lockable().is_some(),
            owner_user_id: job.owner_user_id(),
            name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::JobContext;
    use crate::background_jobs::job::{JobBase, JobError};
    use crate::background_jobs::registry::Registry;
    use crate::background_jobs::worker_pool::{WorkerPool, WorkerPoolConfig};
    use crate::execution_store::SqliteExecutionStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct ReportingJob {
        base: JobBase,
        done: Arc<Notify>,
    }

    #[async_trait]
    impl Job for ReportingJob {
        fn base(&self) -> &JobBase {
            &self.base
        }

        async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
            ctx.set_result(serde_json::json!({ "ok": true }));
            self.done.notify_one();
            Ok(())
        }
    }

    struct Fixture {
        service: JobService,
        pool: Arc<WorkerPool>,
        done: Arc<Notify>,
        _dir: TempDir,
    }

    fn fixture(start_pool: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ExecutionStore> =
            Arc::new(SqliteExecutionStore::new(dir.path().join("jobs.db")).unwrap());
        let monitor = Arc::new(Monitor::new());
        let pool = Arc::new(
            WorkerPool::new(WorkerPoolConfig {
                workers: 1,
                queue_capacity: 4,
                drain_timeout: Duration::from_secs(5),
                ..WorkerPoolConfig::default()
            })
            .with_execution_store(store.clone())
            .with_monitor(monitor.clone()),
        );
        if start_pool {
            pool.start();
        }
        let scheduler = Arc::new(Scheduler::new(Arc::new(Registry::new()), pool.clone()));

        let done = Arc::new(Notify::new());
        scheduler
            .register(Arc::new(ReportingJob {
                base: JobBase::new("report").with_schedule("0 0 6 * * *"),
                done: done.clone(),
            }))
            .unwrap();

        Fixture {
            service: JobService::new(scheduler, monitor, store),
            pool,
            done,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_list_jobs_describes_registered_jobs() {
        let f = fixture(true);

        let jobs = f.service.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "report");
        assert_eq!(jobs[0].schedule.as_deref(), Some("0 0 6 * * *"));
        assert!(jobs[0].next_run_at.is_some());
        assert!(!jobs[0].lockable);
        f.pool.stop().await;
    }

    #[tokio::test]
    async fn test_trigger_returns_pending_execution() {
        let f = fixture(true);

        let execution = f.service.trigger_job("report").unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        tokio::time::timeout(Duration::from_secs(5), f.done.notified())
            .await
            .unwrap();

        // Wait for the worker to persist the outcome.
        let mut stored = None;
        for _ in 0..50 {
            let current = f.service.get_execution(execution.id).unwrap().unwrap();
            if current.status.is_terminal() {
                stored = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let stored = stored.expect("execution should reach a terminal state");
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.result, Some(serde_json::json!({ "ok": true })));

        let status = f.service.get_job_status("report").unwrap().unwrap();
        assert_eq!(status.last_execution.map(|e| e.id), Some(execution.id));
        f.pool.stop().await;
    }

    #[tokio::test]
    async fn test_trigger_unknown_job() {
        let f = fixture(true);

        let err = f.service.trigger_job("missing").unwrap_err();
        assert!(matches!(err, TriggerError::NotFound(_)));
        assert!(f.service.get_job_status("missing").unwrap().is_none());
        assert!(f.service.get_job_history("missing", None).unwrap().is_none());
        f.pool.stop().await;
    }

    #[tokio::test]
    async fn test_rejected_trigger_fails_execution() {
        let f = fixture(false);

        let err = f.service.trigger_job("report").unwrap_err();
        assert!(matches!(err, TriggerError::Rejected(SubmitError::NotRunning)));

        let history = f.service.get_job_history("report", Some(10)).unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert_eq!(history[0].error.as_deref(), Some("Worker pool is not running"));
    }

    #[tokio::test]
    async fn test_history_limit_is_capped() {
        let f = fixture(false);
        for _ in 0..3 {
            let _ = f.service.trigger_job("report");
        }

        assert_eq!(
            f.service.get_job_history("report", Some(2)).unwrap().unwrap().len(),
            2
        );
        assert_eq!(
            f.service.get_job_history("report", Some(0)).unwrap().unwrap().len(),
            1
        );
        assert_eq!(
            f.service.get_job_history("report", Some(1000)).unwrap().unwrap().len(),
            3
        );
    }
}
