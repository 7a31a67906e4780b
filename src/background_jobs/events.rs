use std::time::Duration;
use uuid::Uuid;

/// Identifies the execution an event is about and who should receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEventSource {
    pub job_name: String,
    pub execution_id: Option<Uuid>,
    /// Owning user; `None` means the event goes to every connected user.
    pub user_id: Option<u64>,
}

/// Sink for job lifecycle events.
///
/// Every method is fire-and-forget and must not block the worker calling it.
pub trait JobEventEmitter: Send + Sync {
    fn emit_job_started(&self, source: &JobEventSource);
    fn emit_job_progress(&self, source: &JobEventSource, percent: u8, message: &str);
    fn emit_job_completed(&self, source: &JobEventSource, duration: Duration, attempts: u32);
    fn emit_job_failed(&self, source: &JobEventSource, error: &str, attempts: u32);
}
