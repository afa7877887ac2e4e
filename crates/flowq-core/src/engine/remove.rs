//! Job removal transition.
//!
//! Removing a job takes it out of its state container, runs the hard-mode
//! cascade against its parent, deletes its own keys and emits `removed`.
//! With `remove_children`, same-namespace descendants go first, both the
//! pending ones and those already recorded as processed. Each one is dropped
//! without notifying the job being removed, which is going away anyway.

use tracing::info;

use super::cascade;
use super::placement;
use super::query;
use crate::domain::{
    EventKind, FlowError, FlowResult, JobKey, JobState, QueueEvent, QueueKeys, RemovalMode,
};
use crate::ports::StoreOps;

/// Remove job `id`. Returns false if it does not exist.
///
/// Active jobs are locked by their worker and cannot be removed; the same
/// holds for any descendant that would be removed with it. The check runs
/// before anything is mutated.
pub fn remove_job(
    ops: &mut dyn StoreOps,
    keys: &QueueKeys,
    id: &str,
    remove_children: bool,
) -> FlowResult<bool> {
    let key = keys.job(id);
    if !ops.exists(key.as_str()) {
        return Ok(false);
    }

    let descendants = if remove_children {
        descendants(ops, &key, keys.prefix())
    } else {
        Vec::new()
    };
    for job in std::iter::once(&key).chain(&descendants) {
        let job_keys = job.queue();
        if query::get_state(ops, &job_keys, job.id()) == JobState::Active {
            return Err(FlowError::JobLocked(job.to_string()));
        }
    }

    // Deepest first, so every child is gone before its parent.
    for child in descendants.iter().rev() {
        let child_keys = child.queue();
        let state = query::get_state(ops, &child_keys, child.id());
        drop_job(ops, &child_keys, child, state);
    }

    let state = query::get_state(ops, keys, id);
    placement::remove_from_state(ops, keys, id, state);
    cascade::remove_parent_dependency_key(ops, &key, RemovalMode::HardDeleteCascade, None, keys.prefix());
    drop_job(ops, keys, &key, state);
    info!(job = %key, ?state, children = descendants.len(), "job removed");
    Ok(true)
}

/// Delete a job that no longer needs to notify its parent.
fn drop_job(ops: &mut dyn StoreOps, keys: &QueueKeys, job: &JobKey, state: JobState) {
    placement::remove_from_state(ops, keys, job.id(), state);
    placement::remove_job_keys(ops, job);
    placement::emit(
        ops,
        keys,
        QueueEvent::new(EventKind::Removed).job(job.id()).prev(state),
    );
}

/// Descendants of `root` that live under `prefix`, pending or already
/// processed, in depth-first discovery order.
fn descendants(ops: &dyn StoreOps, root: &JobKey, prefix: &str) -> Vec<JobKey> {
    let mut found: Vec<JobKey> = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(job) = stack.pop() {
        let pending = ops.smembers(&job.dependencies());
        let processed = ops.hgetall(&job.processed()).into_keys();
        for raw in pending.into_iter().chain(processed) {
            let Some(child) = JobKey::parse(&raw) else {
                continue;
            };
            if child.prefix() != prefix || child == *root || found.contains(&child) {
                continue;
            }
            stack.push(child.clone());
            found.push(child);
        }
    }
    found
}
