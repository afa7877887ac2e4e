//! Queue facade: one namespace, one store handle.
//!
//! Every method is a single [`Store::atomically`] call into the engine, so a
//! `Queue` holds no job state of its own. Clones share the store, the clock,
//! the id generator and the wake-up signal.
//!
//! Design:
//! - `lease()` waits like the in-memory queue it grew from: promote due
//!   delayed jobs, try to take one, otherwise sleep until notified, until the
//!   next delayed job is due, or until the poll interval elapses.
//! - The poll interval covers promotions made through another queue's handle
//!   (a child in another namespace completing its parent here).

mod lease;

pub use self::lease::JobLease;

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::warn;

use crate::config::QueueConfig;
use crate::domain::{
    FlowNode, FlowResult, JobKey, JobNode, JobOptions, JobRecord, JobState, QueueKeys,
    RecordedEvent, RemovalMode,
};
use crate::engine::{self, FailOutcome, NewJob, control, query};
use crate::observability::QueueCounts;
use crate::ports::{Clock, IdGenerator, JobReporter, Store, SystemClock, UlidGenerator};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

pub struct Queue<S: Store> {
    keys: QueueKeys,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    notify: Arc<Notify>,
    poll_interval: Duration,
}

impl<S: Store> Clone for Queue<S> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            notify: Arc::clone(&self.notify),
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: Store> Queue<S> {
    pub fn new(store: Arc<S>, keys: QueueKeys) -> Self {
        Self {
            keys,
            store,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            notify: Arc::new(Notify::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(store: Arc<S>, config: &QueueConfig) -> Self {
        Self::new(store, config.keys()).with_poll_interval(config.poll_interval)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Handle on another namespace of the same store, sharing clock and ids.
    pub fn sibling(&self, keys: QueueKeys) -> Self {
        Self {
            keys,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            notify: Arc::new(Notify::new()),
            poll_interval: self.poll_interval,
        }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn wake(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    // ---- producers ----

    pub async fn add_job(&self, name: &str, data: Value, opts: JobOptions) -> FlowResult<JobKey> {
        self.add(name, data, opts, None).await
    }

    /// Add a job as a new dependency of an existing `parent`.
    pub async fn add_child(
        &self,
        parent: &JobKey,
        name: &str,
        data: Value,
        opts: JobOptions,
    ) -> FlowResult<JobKey> {
        self.add(name, data, opts, Some(parent)).await
    }

    async fn add(
        &self,
        name: &str,
        data: Value,
        opts: JobOptions,
        parent: Option<&JobKey>,
    ) -> FlowResult<JobKey> {
        let id = opts
            .job_id
            .clone()
            .unwrap_or_else(|| self.ids.generate_job_id());
        let now = self.clock.now_ms();
        let keys = &self.keys;
        let job = NewJob::new(name, data, opts);
        let key = self
            .store
            .atomically(move |ops| engine::add_job(ops, keys, now, &id, job, parent))
            .await?;
        self.wake();
        Ok(key)
    }

    pub async fn add_flow(&self, flow: FlowNode) -> FlowResult<JobNode> {
        let now = self.clock.now_ms();
        let keys = &self.keys;
        let ids = self.ids.as_ref();
        let tree = self
            .store
            .atomically(move |ops| engine::add_flow(ops, keys, now, ids, flow))
            .await?;
        self.wake();
        Ok(tree)
    }

    // ---- workers ----

    /// Take the next job if one is ready right now.
    pub async fn try_lease(&self) -> FlowResult<Option<JobLease<S>>> {
        let (job, _) = self.take_next().await?;
        Ok(job.map(|job| JobLease::new(job, self.clone())))
    }

    /// Wait for the next job.
    pub async fn lease(&self) -> FlowResult<JobLease<S>> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            let (job, next_due) = self.take_next().await?;
            if let Some(job) = job {
                return Ok(JobLease::new(job, self.clone()));
            }

            let wait = match next_due {
                Some(due) => {
                    let until_due = u64::try_from(due - self.clock.now_ms()).unwrap_or(0);
                    Duration::from_millis(until_due).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            tokio::select! {
                _ = &mut notified => {},
                _ = tokio::time::sleep(wait) => {},
            }
        }
    }

    /// Promote due delayed jobs and take one. Otherwise report when the next
    /// delayed job is due.
    async fn take_next(&self) -> FlowResult<(Option<JobRecord>, Option<i64>)> {
        let now = self.clock.now_ms();
        let keys = &self.keys;
        self.store
            .atomically(move |ops| {
                engine::promote_delayed(ops, keys, now);
                let Some(key) = engine::move_to_active(ops, keys, now) else {
                    let next_due = ops.zfirst(&keys.delayed()).map(|(_, due)| due);
                    return Ok((None, next_due));
                };
                match query::get_job(ops, keys, key.id())? {
                    Some(job) => Ok((Some(job), None)),
                    None => {
                        warn!(job = %key, "waiting entry without a job hash; dropping it");
                        ops.lrem(&keys.active(), key.id());
                        Ok((None, Some(now)))
                    }
                }
            })
            .await
    }

    pub async fn complete(&self, id: &str, value: &Value) -> FlowResult<()> {
        let now = self.clock.now_ms();
        let keys = &self.keys;
        self.store
            .atomically(move |ops| engine::move_to_completed(ops, keys, now, id, value))
            .await?;
        // A promoted parent may be waiting here now.
        self.wake();
        Ok(())
    }

    pub async fn fail(&self, id: &str, reason: &str) -> FlowResult<FailOutcome> {
        let now = self.clock.now_ms();
        let keys = &self.keys;
        let outcome = self
            .store
            .atomically(move |ops| engine::move_to_failed(ops, keys, now, id, reason))
            .await?;
        self.wake();
        Ok(outcome)
    }

    // ---- administration ----

    pub async fn retry(&self, id: &str) -> FlowResult<()> {
        let keys = &self.keys;
        self.store
            .atomically(move |ops| engine::retry_job(ops, keys, id))
            .await?;
        self.wake();
        Ok(())
    }

    pub async fn remove(&self, id: &str, remove_children: bool) -> FlowResult<bool> {
        let keys = &self.keys;
        let removed = self
            .store
            .atomically(move |ops| engine::remove_job(ops, keys, id, remove_children))
            .await?;
        self.wake();
        Ok(removed)
    }

    /// Dependency-removal entry point, with this queue's prefix as the base
    /// namespace.
    pub async fn remove_dependency(&self, job: &JobKey, mode: RemovalMode, parent: Option<&JobKey>) {
        let base_key = self.keys.prefix();
        self.store
            .atomically(move |ops| {
                engine::remove_parent_dependency_key(ops, job, mode, parent, base_key)
            })
            .await;
        self.wake();
    }

    pub async fn pause(&self) -> bool {
        let keys = &self.keys;
        self.store.atomically(move |ops| control::pause(ops, keys)).await
    }

    pub async fn resume(&self) -> bool {
        let keys = &self.keys;
        let resumed = self.store.atomically(move |ops| control::resume(ops, keys)).await;
        self.wake();
        resumed
    }

    pub async fn update_progress(&self, id: &str, progress: &Value) -> FlowResult<()> {
        let keys = &self.keys;
        self.store
            .atomically(move |ops| control::update_progress(ops, keys, id, progress))
            .await
    }

    pub async fn add_log(&self, id: &str, entry: &str) -> FlowResult<usize> {
        let keys = &self.keys;
        self.store
            .atomically(move |ops| control::add_log(ops, keys, id, entry))
            .await
    }

    // ---- queries ----

    pub async fn get_job(&self, id: &str) -> FlowResult<Option<JobRecord>> {
        let keys = &self.keys;
        self.store.atomically(move |ops| query::get_job(ops, keys, id)).await
    }

    pub async fn get_state(&self, id: &str) -> JobState {
        let keys = &self.keys;
        self.store.atomically(move |ops| query::get_state(ops, keys, id)).await
    }

    pub async fn dependencies(&self, parent: &JobKey) -> query::Dependencies {
        self.store
            .atomically(move |ops| query::dependencies(ops, parent))
            .await
    }

    pub async fn counts(&self) -> QueueCounts {
        let keys = &self.keys;
        self.store.atomically(move |ops| query::counts(ops, keys)).await
    }

    pub async fn events(&self, after: Option<&str>) -> Vec<RecordedEvent> {
        let keys = &self.keys;
        self.store.atomically(move |ops| query::events(ops, keys, after)).await
    }
}

#[async_trait]
impl<S: Store> JobReporter for Queue<S> {
    async fn progress(&self, job_id: &str, value: Value) -> FlowResult<()> {
        self.update_progress(job_id, &value).await
    }

    async fn log(&self, job_id: &str, entry: String) -> FlowResult<()> {
        self.add_log(job_id, &entry).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, FlowError};
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn queue(name: &str) -> Queue<InMemoryStore> {
        Queue::new(Arc::new(InMemoryStore::new()), QueueKeys::new("flowq", name))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn lease_wakes_up_when_a_job_arrives() {
        let queue = queue("q");
        let worker = queue.clone();
        let waiting = tokio::spawn(async move { worker.lease().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.add_job("email", json!({"to": "x"}), JobOptions::default().with_id("1")).await.unwrap();

        let lease = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(lease.id(), "1");
        assert_eq!(lease.job().attempts_made, 1);
        assert_eq!(queue.get_state("1").await, JobState::Active);
    }

    #[tokio::test]
    async fn flow_parent_runs_after_its_children_with_their_results() {
        let queue = queue("q");
        let flow = FlowNode::new("report")
            .id("root")
            .child(FlowNode::new("part").id("a").data(json!(1)))
            .child(FlowNode::new("part").id("b").data(json!(2)));
        let tree = queue.add_flow(flow).await.unwrap();

        for _ in 0..2 {
            let lease = queue.try_lease().await.unwrap().unwrap();
            assert_ne!(lease.id(), "root");
            let doubled = json!(lease.job().data.as_i64().unwrap() * 2);
            lease.complete(doubled).await.unwrap();
        }

        let root = queue.try_lease().await.unwrap().unwrap();
        assert_eq!(root.id(), "root");
        let deps = queue.dependencies(&tree.key).await;
        assert!(deps.pending.is_empty());
        assert_eq!(deps.processed[&queue.keys().job("a")], json!(2));
        assert_eq!(deps.processed[&queue.keys().job("b")], json!(4));

        let promoted = queue
            .events(None)
            .await
            .into_iter()
            .filter(|e| e.event.event == EventKind::Active && e.event.job_id.as_deref() == Some("root"))
            .count();
        // Once on promotion, once when the worker took it.
        assert_eq!(promoted, 2);
    }

    #[tokio::test]
    async fn parent_in_another_namespace_is_picked_up_by_its_own_workers() {
        let parents = queue("parents");
        let children = parents.sibling(QueueKeys::new("flowq", "children"));
        parents
            .add_flow(
                FlowNode::new("root")
                    .id("root")
                    .child(FlowNode::new("leaf").id("leaf").in_queue(children.keys().clone())),
            )
            .await
            .unwrap();

        let waiting = {
            let parents = parents.clone();
            tokio::spawn(async move { parents.lease().await })
        };
        children.lease().await.unwrap().complete(json!("done")).await.unwrap();

        let lease = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(lease.id(), "root");
    }

    #[tokio::test]
    async fn delayed_jobs_wait_for_the_clock() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let queue = queue("q").with_clock(clock.clone());
        queue
            .add_job("later", json!(null), JobOptions::default().with_id("1").with_delay(5_000))
            .await
            .unwrap();

        assert!(queue.try_lease().await.unwrap().is_none());
        assert_eq!(queue.get_state("1").await, JobState::Delayed);

        clock.advance(chrono::Duration::seconds(5));
        let lease = queue.try_lease().await.unwrap().unwrap();
        assert_eq!(lease.id(), "1");
    }

    #[tokio::test]
    async fn failing_with_attempts_left_requeues() {
        let queue = queue("q");
        queue
            .add_job("flaky", json!(null), JobOptions::default().with_id("1").with_attempts(2))
            .await
            .unwrap();

        let outcome = queue.try_lease().await.unwrap().unwrap().fail("boom").await.unwrap();
        assert_eq!(outcome, FailOutcome::Retried);
        let outcome = queue.try_lease().await.unwrap().unwrap().fail("boom").await.unwrap();
        assert_eq!(outcome, FailOutcome::Failed);
        assert_eq!(queue.counts().await.failed, 1);

        queue.retry("1").await.unwrap();
        assert_eq!(queue.get_state("1").await, JobState::Wait);
    }

    #[tokio::test]
    async fn reporter_writes_progress_and_logs() {
        let queue = queue("q");
        queue.add_job("x", json!(null), JobOptions::default().with_id("1")).await.unwrap();
        let lease = queue.try_lease().await.unwrap().unwrap();

        let reporter = lease.reporter();
        reporter.progress("1", json!({"pct": 50})).await.unwrap();
        reporter.log("1", "halfway".to_string()).await.unwrap();

        let job = queue.get_job("1").await.unwrap().unwrap();
        assert_eq!(job.progress, Some(json!({"pct": 50})));
        assert!(matches!(
            reporter.log("missing", "x".to_string()).await,
            Err(FlowError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn paused_queue_holds_jobs_until_resumed() {
        let queue = queue("q");
        assert!(queue.pause().await);
        queue.add_job("x", json!(null), JobOptions::default().with_id("1")).await.unwrap();

        assert!(queue.try_lease().await.unwrap().is_none());
        assert_eq!(queue.get_state("1").await, JobState::Paused);

        assert!(queue.resume().await);
        assert_eq!(queue.try_lease().await.unwrap().unwrap().id(), "1");
    }

    #[tokio::test]
    async fn remove_dependency_without_parent_uses_the_back_reference() {
        let queue = queue("q");
        let tree = queue
            .add_flow(FlowNode::new("root").id("root").child(FlowNode::new("leaf").id("leaf")))
            .await
            .unwrap();

        queue
            .remove_dependency(&queue.keys().job("leaf"), RemovalMode::SoftResolve, None)
            .await;

        assert_eq!(queue.get_state("root").await, JobState::Wait);
        assert!(queue.dependencies(&tree.key).await.pending.is_empty());
    }
}
