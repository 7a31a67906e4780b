use super::events::{JobEventEmitter, JobEventSource};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context provided to a job for one execution.
///
/// Carries the execution deadline. The token is cancelled when the deadline
/// passes; jobs must observe it themselves, nothing aborts a running body.
#[derive(Clone)]
pub struct JobContext {
    job_name: String,
    execution_id: Option<Uuid>,
    owner_user_id: Option<u64>,
    cancellation_token: CancellationToken,
    timeout: Duration,
    deadline: Instant,
    emitter: Option<Arc<dyn JobEventEmitter>>,
    result: Arc<Mutex<Option<JsonValue>>>,
}

impl JobContext {
    pub fn new(
        job_name: impl Into<String>,
        execution_id: Option<Uuid>,
        owner_user_id: Option<u64>,
        cancellation_token: CancellationToken,
        timeout: Duration,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            execution_id,
            owner_user_id,
            cancellation_token,
            timeout,
            deadline: Instant::now() + timeout,
            emitter: None,
            result: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_emitter(mut self, emitter: Option<Arc<dyn JobEventEmitter>>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn execution_id(&self) -> Option<Uuid> {
        self.execution_id
    }

    /// Effective timeout of this execution (after the pool's minimum is applied).
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Check if the deadline has passed.
    ///
    /// Long-running jobs should check this between units of work and return
    /// `JobError::Cancelled` when it is true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once the deadline passes.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }

    /// Emit a `job.progress` event, if an emitter is configured.
    pub fn report_progress(&self, percent: u8, message: &str) {
        if let Some(emitter) = &self.emitter {
            emitter.emit_job_progress(&self.event_source(), percent.min(100), message);
        }
    }

    /// Attach an opaque result, persisted with the execution record.
    pub fn set_result(&self, value: JsonValue) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub fn take_result(&self) -> Option<JsonValue> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn event_source(&self) -> JobEventSource {
        JobEventSource {
            job_name: self.job_name.clone(),
            execution_id: self.execution_id,
            user_id: self.owner_user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn result_is_shared_between_clones() {
        let ctx = JobContext::new(
            "job",
            None,
            None,
            CancellationToken::new(),
            Duration::from_secs(30),
        );
        let clone = ctx.clone();
        clone.set_result(serde_json::json!({"synced": 3}));

        assert_eq!(ctx.take_result(), Some(serde_json::json!({"synced": 3})));
        assert_eq!(ctx.take_result(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_shrinks_towards_deadline() {
        let ctx = JobContext::new(
            "job",
            None,
            None,
            CancellationToken::new(),
            Duration::from_secs(30),
        );
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(ctx.remaining(), Duration::from_secs(20));
        assert!(!ctx.is_cancelled());
    }
}
