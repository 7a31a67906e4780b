//! Background job execution system.
//!
//! Jobs are registered once in a shared [`Registry`], fired on cron schedules
//! by the [`Scheduler`] and executed by a bounded [`WorkerPool`] with retries,
//! deadlines and optional cross-process locking.

mod context;
pub mod events;
mod handle;
mod job;
pub mod jobs;
pub mod lock;
mod monitor;
mod registry;
mod scheduler;
mod worker_pool;

pub use context::JobContext;
pub use events::{JobEventEmitter, JobEventSource};
pub use handle::{
    JobInfo, JobService, JobStatus, TriggerError, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};
pub use job::{
    ExecutionStatus, Job, JobBase, JobError, JobResult, Lockable, RetryPolicy, DEFAULT_JOB_TIMEOUT,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF, DEFAULT_RETRY_DELAY,
};
pub use lock::{DistributedLock, LockError, LockKey};
pub use monitor::{JobMetrics, LastRun, Monitor};
pub use registry::{Registry, RegistryError};
pub use scheduler::{parse_schedule, ScheduleEntry, Scheduler, SchedulerError};
pub use worker_pool::{
    SubmitError, WorkerPool, WorkerPoolConfig, DEFAULT_DRAIN_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_WORKERS, MIN_JOB_TIMEOUT,
};
