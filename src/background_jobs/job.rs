use super::context::JobContext;
use super::lock::LockKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Default retry count for jobs that don't override their policy.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default wait before the first retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Default linear increment added for every further retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(60);
/// Declared timeout of a job built from [`JobBase::new`].
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How a failing job is retried.
///
/// A job is attempted `1 + max_retries` times. Attempt `i` (zero based, `i > 0`)
/// waits `delay + (i - 1) * backoff` before running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(serialize_with = "serialize_duration_ms", rename = "delay_ms")]
    pub delay: Duration,
    #[serde(serialize_with = "serialize_duration_ms", rename = "backoff_ms")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration, backoff: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff,
        }
    }

    /// A policy that runs the job exactly once.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Total number of attempts, first run included.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the given zero-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.delay + self.backoff * (attempt - 1)
    }
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Errors a job body can return.
///
/// Every variant counts as a failed attempt and is retried according to the
/// job's [`RetryPolicy`]. A panic inside `execute` is converted to
/// [`JobError::Panicked`] by the worker pool.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Job was cancelled")]
    Cancelled,
    #[error("Task panic: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::ExecutionFailed(msg.into())
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::ExecutionFailed(format!("{:#}", err))
    }
}

/// Reusable implementation of the non-`execute` part of [`Job`].
///
/// Concrete jobs embed a `JobBase` and return it from [`Job::base`].
#[derive(Debug, Clone)]
pub struct JobBase {
    name: String,
    schedule: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
    owner_user_id: Option<u64>,
}

impl JobBase {
    /// A manual-only job with the default timeout and retry policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: String::new(),
            timeout: DEFAULT_JOB_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            owner_user_id: None,
        }
    }

    /// Cron expression (5 or 6 fields). Empty means manual-only.
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Route lifecycle events of this job to a single user.
    pub fn with_owner(mut self, user_id: u64) -> Self {
        self.owner_user_id = Some(user_id);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn owner_user_id(&self) -> Option<u64> {
        self.owner_user_id
    }
}

/// A unit of work run by the [`WorkerPool`](super::WorkerPool).
///
/// Only `base` and `execute` are required; the descriptive members default to
/// the values held by the [`JobBase`].
///
/// The pool never force-terminates a job. When the deadline passes,
/// `ctx.cancellation_token()` is cancelled and `execute` is expected to notice
/// and return; a body that never checks its context runs to completion.
#[async_trait]
pub trait Job: Send + Sync {
    fn base(&self) -> &JobBase;

    /// Unique identifier, used as registry key.
    fn name(&self) -> &str {
        self.base().name()
    }

    /// Cron expression, or an empty string for manual-only jobs.
    fn schedule(&self) -> &str {
        self.base().schedule()
    }

    /// Declared timeout. The pool raises it to its minimum timeout if lower.
    fn timeout(&self) -> Duration {
        self.base().timeout()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.base().retry_policy()
    }

    fn owner_user_id(&self) -> Option<u64> {
        self.base().owner_user_id()
    }

    /// Cross-process exclusion capability, if the job opts into it.
    fn as_lockable(&self) -> Option<&dyn Lockable> {
        None
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Jobs that must never run concurrently for the same key, across processes.
pub trait Lockable {
    fn lock_key(&self) -> LockKey;
}

/// Lifecycle state of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Outcome of one submitted job, as produced by a worker.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_name: String,
    pub execution_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_duration_ms", rename = "duration_ms")]
    pub duration: Duration,
}

impl JobResult {
    /// A failed result for a job that never reached a worker or never ran.
    pub fn rejected(job_name: &str, execution_id: Option<Uuid>, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_name: job_name.to_string(),
            execution_id,
            status: ExecutionStatus::Failed,
            error: Some(error.into()),
            attempts: 0,
            started_at: now,
            completed_at: now,
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}
