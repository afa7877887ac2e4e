//! Worker group: `n` loops that lease, run and settle jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::JobRecord;
use crate::ports::{JobReporter, Store};
use crate::queue::Queue;
use crate::sandbox::SerializedError;
use crate::typed::{JobContext, ProcessorRegistry};

/// Pause after a lease error before trying again.
const LEASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Executes one job and reports its value or its failure.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &JobRecord, reporter: Arc<dyn JobReporter>) -> Result<Value, SerializedError>;
}

/// Runs processors in the worker's own process, on a separate task so that a
/// panic fails the job instead of the worker.
pub struct InlineRunner {
    registry: ProcessorRegistry,
}

impl InlineRunner {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JobRunner for InlineRunner {
    async fn run(&self, job: &JobRecord, reporter: Arc<dyn JobReporter>) -> Result<Value, SerializedError> {
        let Some(processor) = self.registry.get(&job.name) else {
            return Err(SerializedError::new(
                "MissingProcessor",
                format!("no processor registered as `{}`", job.name),
            ));
        };
        let ctx = JobContext::for_job(job, reporter);
        let data = job.data.clone();
        match tokio::spawn(async move { processor.process(data, ctx).await }).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SerializedError::from_processor(&err)),
            Err(err) if err.is_panic() => Err(SerializedError::from_panic(err.into_panic())),
            Err(_) => Err(SerializedError::new("Cancelled", "processor task was cancelled")),
        }
    }
}

/// Worker group handle.
/// - `request_shutdown` stops taking new leases; running jobs finish
/// - `shutdown_and_join` waits for every loop to exit
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn<S: Store>(n: usize, queue: Queue<S>, runner: Arc<dyn JobRunner>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let queue = queue.clone();
                let runner = Arc::clone(&runner);
                let mut rx = shutdown_rx.clone();
                tokio::spawn(async move { worker_loop(worker_id, queue, runner, &mut rx).await })
            })
            .collect();
        info!(queue = %queue.keys(), workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "worker task failed");
            }
        }
    }
}

async fn worker_loop<S: Store>(
    worker_id: usize,
    queue: Queue<S>,
    runner: Arc<dyn JobRunner>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease() only mutates the store inside a single poll, so dropping it
        // here never loses a job.
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = queue.lease() => lease,
        };

        let lease = match lease {
            Ok(lease) => lease,
            Err(err) => {
                warn!(worker_id, error = %err, "lease failed");
                tokio::time::sleep(LEASE_RETRY_DELAY).await;
                continue;
            }
        };

        let job_id = lease.id().to_string();
        debug!(worker_id, job = %job_id, name = %lease.job().name, "processing");
        let result = runner.run(lease.job(), lease.reporter()).await;

        match result {
            Ok(value) => {
                if let Err(err) = lease.complete(value).await {
                    warn!(worker_id, job = %job_id, error = %err, "completing job failed");
                }
            }
            Err(failure) => {
                debug!(worker_id, job = %job_id, error = %failure, "job failed");
                if let Err(err) = lease.fail(&failure.message).await {
                    warn!(worker_id, job = %job_id, error = %err, "failing job failed");
                }
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FlowNode, JobOptions, JobState, QueueKeys};
    use crate::impls::InMemoryStore;
    use crate::typed::handler::fixtures::{Explode, ExplodeHandler, Sum, SumHandler};
    use crate::typed::{FnHandler, ProcessorError, Task};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Boom;

    impl Task for Boom {
        const NAME: &'static str = "test.boom";
        type Output = ();
    }

    fn registry() -> ProcessorRegistry {
        let mut registry = ProcessorRegistry::new();
        registry.register::<Sum, _>(SumHandler).unwrap();
        registry.register::<Explode, _>(ExplodeHandler).unwrap();
        registry
            .register::<Boom, _>(FnHandler(|_task: Boom, _ctx: JobContext| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, ProcessorError>(())
            }))
            .unwrap();
        registry
    }

    fn queue() -> Queue<InMemoryStore> {
        Queue::new(Arc::new(InMemoryStore::new()), QueueKeys::new("flowq", "q"))
            .with_poll_interval(Duration::from_millis(10))
    }

    async fn wait_for(queue: &Queue<InMemoryStore>, id: &str, state: JobState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.get_state(id).await != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn inline_runner_turns_panics_into_failures() {
        let runner = InlineRunner::new(registry());
        let queue = queue();
        let reporter: Arc<dyn JobReporter> = Arc::new(queue.clone());
        let job = JobRecord::new(queue.keys().job("1"), Boom::NAME, json!(null), JobOptions::default(), 0);

        let err = runner.run(&job, reporter).await.unwrap_err();

        assert_eq!(err.name, "Panic");
        assert_eq!(err.message, "boom");
    }

    #[tokio::test]
    async fn group_drains_a_flow() {
        let queue = queue();
        let tree = queue
            .add_flow(
                FlowNode::new(Sum::NAME)
                    .id("total")
                    .data(json!({"values": [1]}))
                    .child(FlowNode::new(Sum::NAME).id("a").data(json!({"values": [1, 2]})))
                    .child(FlowNode::new(Sum::NAME).id("b").data(json!({"values": [3]}))),
            )
            .await
            .unwrap();

        let group = WorkerGroup::spawn(2, queue.clone(), Arc::new(InlineRunner::new(registry())));
        wait_for(&queue, "total", JobState::Completed).await;
        group.shutdown_and_join().await;

        let deps = queue.dependencies(&tree.key).await;
        assert_eq!(deps.processed[&queue.keys().job("a")], json!(3));
        assert_eq!(deps.processed[&queue.keys().job("b")], json!(3));
        let total = queue.get_job("total").await.unwrap().unwrap();
        assert_eq!(total.return_value, Some(json!(1)));
    }

    #[tokio::test]
    async fn failed_jobs_record_the_reason() {
        let queue = queue();
        queue
            .add_job(Explode::NAME, json!(null), JobOptions::default().with_id("x"))
            .await
            .unwrap();

        let group = WorkerGroup::spawn(1, queue.clone(), Arc::new(InlineRunner::new(registry())));
        wait_for(&queue, "x", JobState::Failed).await;
        group.shutdown_and_join().await;

        let job = queue.get_job("x").await.unwrap().unwrap();
        assert_eq!(job.failed_reason.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let group = WorkerGroup::spawn(3, queue(), Arc::new(InlineRunner::new(registry())));
        tokio::time::timeout(Duration::from_secs(2), group.shutdown_and_join())
            .await
            .unwrap();
    }
}
