//! In-memory execution metrics per job name.

use super::job::{ExecutionStatus, JobResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Snapshot of the most recent run of a job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LastRun {
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobMetrics {
    pub job_name: String,
    pub total_runs: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: u64,
    pub consecutive_failures: u64,
    pub last_run: Option<LastRun>,
}

impl JobMetrics {
    fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            total_runs: 0,
            success_count: 0,
            failure_count: 0,
            total_duration_ms: 0,
            average_duration_ms: 0,
            consecutive_failures: 0,
            last_run: None,
        }
    }

    /// Percentage of successful runs, 0 when the job never ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_runs as f64 * 100.0
    }
}

/// Aggregates [`JobResult`]s into [`JobMetrics`].
///
/// All readers get copies; nothing handed out aliases the internal map.
#[derive(Default)]
pub struct Monitor {
    metrics: RwLock<HashMap<String, JobMetrics>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&self, result: &JobResult) {
        let duration_ms = result.duration.as_millis() as u64;
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let entry = metrics
            .entry(result.job_name.clone())
            .or_insert_with(|| JobMetrics::new(&result.job_name));

        entry.total_runs += 1;
        entry.total_duration_ms += duration_ms;
        entry.average_duration_ms = entry.total_duration_ms / entry.total_runs;

        if result.is_success() {
            entry.success_count += 1;
            entry.consecutive_failures = 0;
        } else {
            entry.failure_count += 1;
            entry.consecutive_failures += 1;
        }

        entry.last_run = Some(LastRun {
            status: result.status,
            started_at: result.started_at,
            completed_at: result.completed_at,
            duration_ms,
            attempts: result.attempts,
            error: result.error.clone(),
        });
    }

    pub fn get_metrics(&self, job_name: &str) -> Option<JobMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
    }

    /// Metrics of every job that ran at least once, sorted by job name.
    pub fn get_all_metrics(&self) -> Vec<JobMetrics> {
        let mut all: Vec<JobMetrics> = self
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn get_success_rate(&self, job_name: &str) -> f64 {
        self.get_metrics(job_name)
            .map(|m| m.success_rate())
            .unwrap_or(0.0)
    }

    /// Jobs whose current failure streak is at least `threshold`.
    pub fn get_jobs_with_consecutive_failures(&self, threshold: u64) -> Vec<JobMetrics> {
        let mut failing: Vec<JobMetrics> = self
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|m| m.consecutive_failures >= threshold)
            .cloned()
            .collect();
        failing.sort_by(|a, b| b.consecutive_failures.cmp(&a.consecutive_failures));
        failing
    }
}
