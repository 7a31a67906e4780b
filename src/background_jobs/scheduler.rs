use super::job::{Job, JobResult};
use super::registry::{Registry, RegistryError};
use super::worker_pool::{SubmitError, WorkerPool};
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Invalid schedule for job {job}: {reason}")]
    InvalidSchedule { job: String, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Cron entry as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    pub job_name: String,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
}

struct CronEntry {
    expression: String,
    schedule: Schedule,
}

#[derive(Default)]
struct DispatchState {
    running: bool,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Accepts 5-field expressions by prepending a seconds field.
pub fn parse_schedule(expression: &str) -> Result<Schedule, cron::error::Error> {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", trimmed))
    } else {
        Schedule::from_str(trimmed)
    }
}

/// Fires registered jobs on their cron schedule and serves manual triggers.
///
/// Jobs live in the shared [`Registry`]; the scheduler only keeps the parsed
/// cron entries. Scheduled runs go through [`WorkerPool::submit_async`] and
/// never wait for the job to finish.
pub struct Scheduler {
    registry: Arc<Registry>,
    pool: Arc<WorkerPool>,
    entries: RwLock<HashMap<String, CronEntry>>,
    state: Mutex<DispatchState>,
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>, pool: Arc<WorkerPool>) -> Self {
        Self {
            registry,
            pool,
            entries: RwLock::new(HashMap::new()),
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Register a job. Registering a name that is already scheduled is a no-op.
    ///
    /// A job already present in the shared registry is scheduled from the
    /// registry's instance. Jobs with an empty schedule can only be triggered
    /// manually.
    pub fn register(&self, job: Arc<dyn Job>) -> Result<(), SchedulerError> {
        let name = job.name().to_string();
        let job = self.registry.get(&name).unwrap_or(job);

        let expression = job.schedule().trim().to_string();
        let schedule = if expression.is_empty() {
            None
        } else {
            let schedule =
                parse_schedule(&expression).map_err(|e| SchedulerError::InvalidSchedule {
                    job: name.clone(),
                    reason: e.to_string(),
                })?;
            Some(schedule)
        };

        match self.registry.register(job) {
            Ok(()) => {}
            Err(RegistryError::AlreadyExists(_)) => debug!("Job {} already in the registry", name),
            Err(e) => return Err(e.into()),
        }

        let Some(schedule) = schedule else {
            info!("Registered manual job {}", name);
            return Ok(());
        };

        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if entries.contains_key(&name) {
                debug!("Job {} already scheduled", name);
                return Ok(());
            }
            entries.insert(
                name.clone(),
                CronEntry {
                    expression: expression.clone(),
                    schedule: schedule.clone(),
                },
            );
        }
        info!("Registered job {} with schedule '{}'", name, expression);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.running {
            let task = self.spawn_dispatch(name, schedule, state.shutdown.clone());
            state.tasks.push(task);
        }
        Ok(())
    }

    /// Start firing cron entries. Calling it while running does nothing.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.running {
            return;
        }
        let shutdown = CancellationToken::new();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        state.tasks = entries
            .iter()
            .map(|(name, entry)| {
                self.spawn_dispatch(name.clone(), entry.schedule.clone(), shutdown.clone())
            })
            .collect();
        state.shutdown = shutdown;
        state.running = true;
        info!("Scheduler started with {} cron entries", entries.len());
    }

    /// Stop firing cron entries.
    ///
    /// Returns once every dispatch task has exited; jobs already handed to the
    /// pool keep running.
    pub async fn stop(&self) {
        let tasks = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.running {
                return;
            }
            state.running = false;
            state.shutdown.cancel();
            std::mem::take(&mut state.tasks)
        };
        join_all(tasks).await;
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    /// Run a job now and wait for its outcome.
    ///
    /// Only an unknown name is an error; execution failures are reported in
    /// the returned [`JobResult`].
    pub async fn trigger_job(&self, name: &str) -> Result<JobResult, SchedulerError> {
        let job = self.get_job(name)?;
        info!("Manually triggered job {}", name);
        Ok(self.pool.submit(job).await)
    }

    /// Queue a job now without waiting for it.
    pub fn trigger_job_async(&self, name: &str) -> Result<(), SchedulerError> {
        let job = self.get_job(name)?;
        self.pool.submit_async(job)?;
        info!("Manually queued job {}", name);
        Ok(())
    }

    /// Like [`trigger_job_async`](Self::trigger_job_async), recording the run
    /// under an execution created by the caller.
    pub fn trigger_job_tracked(&self, name: &str, execution_id: Uuid) -> Result<(), SchedulerError> {
        let job = self.get_job(name)?;
        self.pool.submit_async_tracked(job, execution_id)?;
        info!("Manually queued job {} as execution {}", name, execution_id);
        Ok(())
    }

    pub fn get_job(&self, name: &str) -> Result<Arc<dyn Job>, SchedulerError> {
        self.registry
            .get(name)
            .map_err(|_| SchedulerError::NotFound(name.to_string()))
    }

    pub fn list_jobs(&self) -> Vec<Arc<dyn Job>> {
        self.registry.list()
    }

    /// Cron entries sorted by job name, with their next fire time.
    pub fn get_entries(&self) -> Vec<ScheduleEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<ScheduleEntry> = entries
            .iter()
            .map(|(name, entry)| ScheduleEntry {
                job_name: name.clone(),
                schedule: entry.expression.clone(),
                next_run: entry.schedule.upcoming(Utc).next(),
            })
            .collect();
        result.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        result
    }

    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .and_then(|entry| entry.schedule.upcoming(Utc).next())
    }

    fn spawn_dispatch(
        &self,
        name: String,
        schedule: Schedule,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let mut next = schedule.upcoming(Utc).next();
            while let Some(fire_at) = next {
                let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }

                match registry.get(&name) {
                    Ok(job) => {
                        debug!("Cron fired for job {}", name);
                        if let Err(e) = pool.submit_async(job) {
                            warn!("Scheduled run of {} dropped: {}", name, e);
                        }
                    }
                    Err(_) => {
                        warn!("Job {} is no longer registered, removing its schedule", name);
                        return;
                    }
                }
                next = schedule.after(&fire_at.max(Utc::now())).next();
            }
            debug!("Schedule for job {} has no further runs", name);
        })
    }
}
