//! Execution history cleanup background job.
//!
//! Deletes job execution records older than the configured retention period.

use crate::background_jobs::{
    context::JobContext,
    job::{Job, JobBase, JobError, Lockable},
    lock::LockKey,
};
use crate::execution_store::ExecutionStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub const JOB_NAME: &str = "execution_history_cleanup";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_SCHEDULE: &str = "0 30 3 * * *";

/// Prunes old execution history.
///
/// Lockable, so only one server sharing the datastore prunes at a time.
pub struct ExecutionHistoryCleanupJob {
    base: JobBase,
    store: Arc<dyn ExecutionStore>,
    retention_days: u32,
}

impl ExecutionHistoryCleanupJob {
    pub fn new(store: Arc<dyn ExecutionStore>, retention_days: u32, schedule: &str) -> Self {
        Self {
            base: JobBase::new(JOB_NAME).with_schedule(schedule),
            store,
            retention_days,
        }
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }
}

#[async_trait]
impl Job for ExecutionHistoryCleanupJob {
    fn base(&self) -> &JobBase {
        &self.base
    }

    fn as_lockable(&self) -> Option<&dyn Lockable> {
        Some(self)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.retention_days));
        info!(
            "Cleaning up job executions older than {} days (cutoff: {})",
            self.retention_days, cutoff
        );

        let deleted = self.store.delete_executions_before(cutoff)?;
        if deleted > 0 {
            info!("Deleted {} old job executions", deleted);
        } else {
            info!("No job executions to clean up");
        }

        ctx.set_result(serde_json::json!({ "deleted": deleted }));
        Ok(())
    }
}

impl Lockable for ExecutionHistoryCleanupJob {
    fn lock_key(&self) -> LockKey {
        LockKey::for_entity(JOB_NAME, "global")
    }
}
