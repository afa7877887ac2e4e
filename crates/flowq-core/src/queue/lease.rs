use std::sync::Arc;

use serde_json::Value;

use super::Queue;
use crate::domain::{FlowResult, JobRecord};
use crate::engine::FailOutcome;
use crate::ports::{JobReporter, Store};

/// A job taken by a worker.
///
/// The worker owns the lease and must either `complete` or `fail` it; the
/// queue decides what happens next (retry, promotion of the parent, ...).
pub struct JobLease<S: Store> {
    job: JobRecord,
    queue: Queue<S>,
}

impl<S: Store> JobLease<S> {
    pub(super) fn new(job: JobRecord, queue: Queue<S>) -> Self {
        Self { job, queue }
    }

    pub fn job(&self) -> &JobRecord {
        &self.job
    }

    pub fn id(&self) -> &str {
        self.job.id()
    }

    /// Progress/log sink bound to this job's queue.
    pub fn reporter(&self) -> Arc<dyn JobReporter> {
        Arc::new(self.queue.clone())
    }

    pub async fn complete(self, value: Value) -> FlowResult<()> {
        self.queue.complete(self.job.id(), &value).await
    }

    pub async fn fail(self, reason: &str) -> FlowResult<FailOutcome> {
        self.queue.fail(self.job.id(), reason).await
    }
}
