//! Job and flow construction.
//!
//! This is where dependency sets are born: a child's key is added to its
//! parent's `:dependencies` set before the child is placed anywhere, and a
//! parent with children starts in `waiting-children`.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use super::dependency;
use super::placement::{self, ListEnd};
use super::query;
use crate::domain::{
    EventKind, FlowError, FlowNode, FlowResult, JobKey, JobNode, JobOptions, JobRecord, JobState,
    QueueEvent, QueueKeys, validate_job_id,
};
use crate::ports::{IdGenerator, StoreOps};

/// Everything needed to store one job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub data: Value,
    pub opts: JobOptions,
}

impl NewJob {
    pub fn new(name: impl Into<String>, data: Value, opts: JobOptions) -> Self {
        Self {
            name: name.into(),
            data,
            opts,
        }
    }
}

/// Add one job, optionally as a new dependency of an existing parent.
///
/// A job whose id already exists is left untouched and its key returned.
pub fn add_job(
    ops: &mut dyn StoreOps,
    keys: &QueueKeys,
    now: i64,
    id: &str,
    job: NewJob,
    parent: Option<&JobKey>,
) -> FlowResult<JobKey> {
    validate_job_id(id)?;
    let key = keys.job(id);
    if ops.exists(key.as_str()) {
        debug!(job = %key, "duplicate job id");
        placement::emit(ops, keys, QueueEvent::new(EventKind::Duplicated).job(id));
        return Ok(key);
    }
    let parent_state = match parent {
        Some(parent) => Some(blockable_state(ops, parent)?),
        None => None,
    };

    let mut record = JobRecord::new(key.clone(), job.name, job.data, job.opts, now);
    record.parent_key = parent.cloned();
    write_job(ops, &record)?;
    if let (Some(parent), Some(state)) = (parent, parent_state) {
        block_parent(ops, parent, state, now);
        dependency::add_dependency(ops, parent, &key);
    }
    place_new_job(ops, keys, &record, now);
    Ok(key)
}

/// State of a parent that may take a new dependency.
///
/// Only a parent that has not started yet qualifies: once it is active or
/// finished, resolving the new child would queue it a second time.
fn blockable_state(ops: &dyn StoreOps, parent: &JobKey) -> FlowResult<JobState> {
    if !ops.exists(parent.as_str()) {
        return Err(FlowError::ParentNotFound(parent.to_string()));
    }
    match query::get_state(ops, &parent.queue(), parent.id()) {
        state @ (JobState::WaitingChildren | JobState::Wait | JobState::Paused | JobState::Delayed) => {
            Ok(state)
        }
        actual => Err(FlowError::UnexpectedState {
            job_id: parent.id().to_string(),
            expected: JobState::WaitingChildren,
            actual,
        }),
    }
}

/// Move a queued parent into `waiting-children`. A delayed parent gives up
/// its delay and becomes ready when its children are done.
fn block_parent(ops: &mut dyn StoreOps, parent: &JobKey, state: JobState, now: i64) {
    if state == JobState::WaitingChildren {
        return;
    }
    let parent_keys = parent.queue();
    placement::remove_from_state(ops, &parent_keys, parent.id(), state);
    ops.zadd(&parent_keys.waiting_children(), now, parent.id());
    placement::emit(
        ops,
        &parent_keys,
        QueueEvent::new(EventKind::WaitingChildren).job(parent.id()).prev(state),
    );
    debug!(parent = %parent, from = %state, "parent blocked on a new child");
}

/// Validated node with its id assigned.
struct PlannedNode {
    key: JobKey,
    job: NewJob,
    children: Vec<PlannedNode>,
}

/// Add a whole flow in one invocation.
///
/// Every id is assigned and checked before anything is written, so an invalid
/// flow leaves the store untouched.
pub fn add_flow(
    ops: &mut dyn StoreOps,
    keys: &QueueKeys,
    now: i64,
    ids: &dyn IdGenerator,
    flow: FlowNode,
) -> FlowResult<JobNode> {
    let mut seen = HashSet::new();
    let plan = plan_node(ops, keys, ids, flow, &mut seen)?;
    write_node(ops, now, plan, None)
}

fn plan_node(
    ops: &dyn StoreOps,
    keys: &QueueKeys,
    ids: &dyn IdGenerator,
    node: FlowNode,
    seen: &mut HashSet<JobKey>,
) -> FlowResult<PlannedNode> {
    let queue = node.queue.unwrap_or_else(|| keys.clone());
    let id = match &node.opts.job_id {
        Some(id) => id.clone(),
        None => ids.generate_job_id(),
    };
    validate_job_id(&id)?;
    let key = queue.job(&id);
    if !seen.insert(key.clone()) {
        return Err(FlowError::InvalidFlow(format!("job {key} appears twice")));
    }
    if ops.exists(key.as_str()) {
        return Err(FlowError::InvalidFlow(format!("job {key} already exists")));
    }

    let children = node
        .children
        .into_iter()
        .map(|child| plan_node(ops, &queue, ids, child, seen))
        .collect::<FlowResult<Vec<_>>>()?;

    Ok(PlannedNode {
        key,
        job: NewJob::new(node.name, node.data, node.opts),
        children,
    })
}

fn write_node(
    ops: &mut dyn StoreOps,
    now: i64,
    node: PlannedNode,
    parent: Option<&JobKey>,
) -> FlowResult<JobNode> {
    let queue = node.key.queue();
    let mut record = JobRecord::new(node.key.clone(), node.job.name, node.job.data, node.job.opts, now);
    record.parent_key = parent.cloned();
    write_job(ops, &record)?;
    if let Some(parent) = parent {
        dependency::add_dependency(ops, parent, &node.key);
    }

    if node.children.is_empty() {
        place_new_job(ops, &queue, &record, now);
        return Ok(JobNode {
            key: node.key,
            children: Vec::new(),
        });
    }

    ops.zadd(&queue.waiting_children(), now, node.key.id());
    placement::emit(
        ops,
        &queue,
        QueueEvent::new(EventKind::WaitingChildren).job(node.key.id()),
    );
    let children = node
        .children
        .into_iter()
        .map(|child| write_node(ops, now, child, Some(&node.key)))
        .collect::<FlowResult<Vec<_>>>()?;

    Ok(JobNode {
        key: node.key,
        children,
    })
}

fn write_job(ops: &mut dyn StoreOps, record: &JobRecord) -> FlowResult<()> {
    let fields = record.to_fields()?;
    ops.hset_all(record.key.as_str(), &fields);
    Ok(())
}

/// Place a job without children: `delayed` or the ready list.
fn place_new_job(ops: &mut dyn StoreOps, keys: &QueueKeys, record: &JobRecord, now: i64) -> JobState {
    let id = record.id();
    placement::emit(
        ops,
        keys,
        QueueEvent::new(EventKind::Added).job(id).with("name", record.name.clone()),
    );

    if record.opts.delay > 0 {
        let run_at = now.saturating_add(i64::try_from(record.opts.delay).unwrap_or(i64::MAX));
        ops.zadd(&keys.delayed(), run_at, id);
        placement::emit(
            ops,
            keys,
            QueueEvent::new(EventKind::Delayed)
                .job(id)
                .with("delay", run_at.to_string()),
        );
        return JobState::Delayed;
    }

    let state = placement::push_ready(ops, keys, id, ListEnd::Back);
    placement::emit(ops, keys, QueueEvent::new(EventKind::Waiting).job(id));
    state
}
