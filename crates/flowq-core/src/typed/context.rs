use std::sync::Arc;

use serde_json::Value;

use crate::domain::{FlowResult, JobRecord};
use crate::ports::JobReporter;

/// What a processor knows about the job it is running.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,
    pub name: String,
    /// 1 on the first attempt.
    pub attempts_made: u32,
    reporter: Arc<dyn JobReporter>,
}

impl JobContext {
    pub fn new(
        job_id: impl Into<String>,
        name: impl Into<String>,
        attempts_made: u32,
        reporter: Arc<dyn JobReporter>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
            attempts_made,
            reporter,
        }
    }

    pub fn for_job(job: &JobRecord, reporter: Arc<dyn JobReporter>) -> Self {
        Self::new(job.id(), job.name.clone(), job.attempts_made, reporter)
    }

    pub async fn progress(&self, value: Value) -> FlowResult<()> {
        self.reporter.progress(&self.job_id, value).await
    }

    pub async fn log(&self, entry: impl Into<String>) -> FlowResult<()> {
        self.reporter.log(&self.job_id, entry.into()).await
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("name", &self.name)
            .field("attempts_made", &self.attempts_made)
            .finish_non_exhaustive()
    }
}
