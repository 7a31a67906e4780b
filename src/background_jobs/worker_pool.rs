//! Fixed-size pool of workers draining a bounded job queue.
//!
//! Each submitted job goes `queued -> running -> completed | failed`. Retries
//! happen inside `running` and are not visible from outside.

use super::context::JobContext;
use super::events::JobEventEmitter;
use super::job::{ExecutionStatus, Job, JobError, JobResult};
use super::lock::{DistributedLock, LockKey};
use super::monitor::Monitor;
use crate::execution_store::{ExecutionOutcome, ExecutionStore};
use crate::server::metrics;
use chrono::Utc;
use futures::future::join_all;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Floor applied to every job's declared timeout.
pub const MIN_JOB_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const STOPPED_BEFORE_RUN: &str = "worker pool stopped before the job ran";

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub min_timeout: Duration,
    /// How long `stop` waits for in-flight jobs before giving up.
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            min_timeout: MIN_JOB_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Job queue is full")]
    QueueFull,
    #[error("Worker pool is not running")]
    NotRunning,
}

impl SubmitError {
    fn metric_label(&self) -> &'static str {
        match self {
            SubmitError::QueueFull => "queue_full",
            SubmitError::NotRunning => "not_running",
        }
    }
}

struct QueuedJob {
    job: Arc<dyn Job>,
    execution_id: Option<Uuid>,
    reply: Option<oneshot::Sender<JobResult>>,
}

#[derive(Default)]
struct PoolState {
    /// `Some` while the pool is running.
    sender: Option<mpsc::Sender<QueuedJob>>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// Collaborators shared by every worker.
#[derive(Clone)]
struct Executor {
    min_timeout: Duration,
    lock: Option<Arc<dyn DistributedLock>>,
    emitter: Option<Arc<dyn JobEventEmitter>>,
    monitor: Option<Arc<Monitor>>,
    store: Option<Arc<dyn ExecutionStore>>,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    executor: Executor,
    state: RwLock<PoolState>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let executor = Executor {
            min_timeout: config.min_timeout.max(MIN_JOB_TIMEOUT),
            lock: None,
            emitter: None,
            monitor: None,
            store: None,
        };
        Self {
            config,
            executor,
            state: RwLock::new(PoolState::default()),
        }
    }

    /// Lock backend used for jobs that implement `Lockable`.
    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.executor.lock = Some(lock);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn JobEventEmitter>) -> Self {
        self.executor.emitter = Some(emitter);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.executor.monitor = Some(monitor);
        self
    }

    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.executor.store = Some(store);
        self
    }

    /// Deadline a run of `job` gets: its declared timeout, floored.
    pub fn effective_timeout(&self, job: &dyn Job) -> Duration {
        self.executor.effective_timeout(job)
    }

    /// Spawn the workers. Calling it on a running pool does nothing.
    pub fn start(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.sender.is_some() {
            debug!("Worker pool already running");
            return;
        }

        let workers = self.config.workers.max(1);
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let executor = Arc::new(self.executor.clone());

        state.workers = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    executor.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();
        state.sender = Some(sender);
        state.shutdown = shutdown;

        info!(
            "Worker pool started with {} workers (queue capacity {})",
            workers, self.config.queue_capacity
        );
    }

    /// Stop accepting jobs and wait for in-flight ones to finish.
    ///
    /// Running jobs are never cancelled. Jobs still queued are abandoned.
    /// Waits at most `drain_timeout`; calling it on a stopped pool does nothing.
    pub async fn stop(&self) {
        let (sender, workers) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let Some(sender) = state.sender.take() else {
                return;
            };
            state.shutdown.cancel();
            (sender, std::mem::take(&mut state.workers))
        };
        drop(sender);

        info!("Stopping worker pool, waiting for {} workers", workers.len());
        match tokio::time::timeout(self.config.drain_timeout, join_all(workers)).await {
            Ok(_) => info!("Worker pool stopped"),
            Err(_) => warn!(
                "Worker pool did not drain within {:?}, leaving running jobs behind",
                self.config.drain_timeout
            ),
        }
        metrics::reset_queue_depth();
    }

    pub fn is_running(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .is_some()
    }

    /// Number of live workers (0 when stopped).
    pub fn worker_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .workers
            .len()
    }

    /// Jobs waiting in the queue, not counting the ones being executed.
    pub fn queue_size(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .sender
            .as_ref()
            .map(|sender| sender.max_capacity() - sender.capacity())
            .unwrap_or(0)
    }

    /// Enqueue `job` and wait for its outcome.
    ///
    /// A full queue or stopped pool yields a `Failed` result right away.
    pub async fn submit(&self, job: Arc<dyn Job>) -> JobResult {
        self.submit_tracked(job, None).await
    }

    /// Like [`submit`](Self::submit), reusing an execution record created by the caller.
    pub async fn submit_tracked(&self, job: Arc<dyn Job>, execution_id: Option<Uuid>) -> JobResult {
        let job_name = job.name().to_string();
        let (reply, outcome) = oneshot::channel();
        if let Err(e) = self.enqueue(QueuedJob {
            job,
            execution_id,
            reply: Some(reply),
        }) {
            return JobResult::rejected(&job_name, execution_id, e.to_string());
        }
        outcome
            .await
            .unwrap_or_else(|_| JobResult::rejected(&job_name, execution_id, STOPPED_BEFORE_RUN))
    }

    /// Enqueue `job` without waiting for it. Never blocks.
    pub fn submit_async(&self, job: Arc<dyn Job>) -> Result<(), SubmitError> {
        self.enqueue(QueuedJob {
            job,
            execution_id: None,
            reply: None,
        })
    }

    pub fn submit_async_tracked(
        &self,
        job: Arc<dyn Job>,
        execution_id: Uuid,
    ) -> Result<(), SubmitError> {
        self.enqueue(QueuedJob {
            job,
            execution_id: Some(execution_id),
            reply: None,
        })
    }

    fn enqueue(&self, queued: QueuedJob) -> Result<(), SubmitError> {
        let job_name = queued.job.name().to_string();
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let result = match state.sender.as_ref() {
            None => Err(SubmitError::NotRunning),
            Some(sender) => match sender.try_send(queued) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull),
                Err(TrySendError::Closed(_)) => Err(SubmitError::NotRunning),
            },
        };

        match &result {
            Ok(()) => {
                metrics::job_enqueued();
                debug!("Queued job {}", job_name);
            }
            Err(e) => {
                metrics::record_queue_rejection(e.metric_label());
                warn!("Rejected job {}: {}", job_name, e);
            }
        }
        result
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    executor: Arc<Executor>,
    shutdown: CancellationToken,
) {
    debug!("Worker {} started", worker_id);
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            queued = async { receiver.lock().await.recv().await } => queued,
        };
        let Some(queued) = next else {
            break;
        };
        metrics::job_dequeued();

        let result = executor.run(queued.job, queued.execution_id).await;
        if let Some(reply) = queued.reply {
            // The submitter may have gone away, which is fine.
            let _ = reply.send(result);
        }
    }
    debug!("Worker {} exiting", worker_id);
}

impl Executor {
    fn effective_timeout(&self, job: &dyn Job) -> Duration {
        job.timeout().max(self.min_timeout)
    }

    async fn run(&self, job: Arc<dyn Job>, execution_id: Option<Uuid>) -> JobResult {
        let job_name = job.name().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let timeout = self.effective_timeout(job.as_ref());
        let execution_id = self.begin_execution(&job_name, execution_id);

        let deadline = CancellationToken::new();
        let deadline_timer = {
            let deadline = deadline.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            })
        };

        let ctx = JobContext::new(
            job_name.clone(),
            execution_id,
            job.owner_user_id(),
            deadline.clone(),
            timeout,
        )
        .with_emitter(self.emitter.clone());

        let lock_key = job.as_lockable().map(|lockable| lockable.lock_key());
        if let Some(key) = lock_key {
            if let Err(reason) = self.acquire_lock(&job_name, key).await {
                deadline_timer.abort();
                warn!("Skipping job {}: {}", job_name, reason);
                let result = JobResult {
                    job_name,
                    execution_id,
                    status: ExecutionStatus::Failed,
                    error: Some(reason),
                    attempts: 0,
                    started_at,
                    completed_at: Utc::now(),
                    duration: start.elapsed(),
                };
                self.record(&result, None);
                if let Some(emitter) = &self.emitter {
                    let error = result.error.as_deref().unwrap_or_default();
                    emitter.emit_job_failed(&ctx.event_source(), error, 0);
                }
                return result;
            }
        }

        if let (Some(store), Some(id)) = (&self.store, execution_id) {
            if let Err(e) = store.mark_running(id, started_at) {
                error!("Failed to mark execution {} running: {:#}", id, e);
            }
        }
        if let Some(emitter) = &self.emitter {
            emitter.emit_job_started(&ctx.event_source());
        }
        info!("Running job {} (timeout {:?})", job_name, timeout);

        let policy = job.retry_policy();
        let total_attempts = policy.total_attempts();
        let mut attempts = 0;
        let mut last_error: Option<JobError> = None;

        for attempt in 1..=total_attempts {
            if attempt > 1 {
                let delay = policy.delay_for_attempt(attempt - 1);
                debug!("Retrying job {} in {:?}", job_name, delay);
                tokio::select! {
                    _ = deadline.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
                if deadline.is_cancelled() {
                    warn!("Job {} hit its deadline, giving up on retries", job_name);
                    break;
                }
            }

            attempts = attempt;
            match run_attempt(job.clone(), ctx.clone()).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    warn!(
                        "Job {} attempt {}/{} failed: {}",
                        job_name, attempt, total_attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        deadline_timer.abort();
        if let (Some(lock), Some(key)) = (&self.lock, lock_key) {
            if let Err(e) = lock.unlock(key).await {
                warn!("Failed to release lock {} for job {}: {}", key, job_name, e);
            }
        }

        let duration = start.elapsed();
        let result = JobResult {
            job_name,
            execution_id,
            status: if last_error.is_none() {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            },
            error: last_error.map(|e| e.to_string()),
            attempts,
            started_at,
            completed_at: Utc::now(),
            duration,
        };
        self.record(&result, ctx.take_result());

        match &result.error {
            None => {
                info!(
                    "Job {} completed in {:?} after {} attempt(s)",
                    result.job_name, duration, attempts
                );
                if let Some(emitter) = &self.emitter {
                    emitter.emit_job_completed(&ctx.event_source(), duration, attempts);
                }
            }
            Some(error) => {
                error!(
                    "Job {} failed after {} attempt(s): {}",
                    result.job_name, attempts, error
                );
                if let Some(emitter) = &self.emitter {
                    emitter.emit_job_failed(&ctx.event_source(), error, attempts);
                }
            }
        }
        result
    }

    /// Resolve the execution record for this run, creating one if the caller did not.
    fn begin_execution(&self, job_name: &str, execution_id: Option<Uuid>) -> Option<Uuid> {
        let store = match &self.store {
            Some(store) => store,
            None => return execution_id,
        };
        if execution_id.is_some() {
            return execution_id;
        }
        match store.create_execution(job_name) {
            Ok(execution) => Some(execution.id),
            Err(e) => {
                error!("Failed to record execution of {}: {:#}", job_name, e);
                None
            }
        }
    }

    async fn acquire_lock(&self, job_name: &str, key: LockKey) -> Result<(), String> {
        let lock = self
            .lock
            .as_ref()
            .ok_or_else(|| format!("job {} requires a lock but no lock backend is configured", job_name))?;
        match lock.try_lock(key).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("lock {} is held by another run", key)),
            Err(e) => Err(format!("failed to acquire lock {}: {}", key, e)),
        }
    }

    fn record(&self, result: &JobResult, value: Option<serde_json::Value>) {
        metrics::record_job_execution(&result.job_name, result.status.as_str(), result.duration);
        if let Some(monitor) = &self.monitor {
            monitor.record_execution(result);
        }
        if let (Some(store), Some(id)) = (&self.store, result.execution_id) {
            let outcome = ExecutionOutcome {
                status: result.status,
                error: result.error.clone(),
                result: value,
                duration_ms: result.duration.as_millis() as i64,
            };
            if let Err(e) = store.complete_execution(id, &outcome) {
                error!("Failed to record outcome of execution {}: {:#}", id, e);
            }
        }
    }
}

/// Run one attempt on its own task so that a panic surfaces as an error.
async fn run_attempt(job: Arc<dyn Job>, ctx: JobContext) -> Result<(), JobError> {
    match tokio::spawn(async move { job.execute(&ctx).await }).await {
        Ok(result) => result,
        Err(e) => Err(JobError::Panicked(panic_message(e))),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
