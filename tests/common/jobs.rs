//! Jobs registered on the test server

use async_trait::async_trait;
use lifehub_server::background_jobs::{Job, JobBase, JobContext, JobError};
use serde_json::json;

use super::constants::ECHO_JOB;

/// Manual-only job that reports progress once and stores a small result.
pub struct EchoJob {
    base: JobBase,
}

impl EchoJob {
    pub fn new() -> Self {
        Self {
            base: JobBase::new(ECHO_JOB),
        }
    }
}

#[async_trait]
impl Job for EchoJob {
    fn base(&self) -> &JobBase {
        &self.base
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.report_progress(50, "halfway");
        ctx.set_result(json!({ "echo": true }));
        Ok(())
    }
}
