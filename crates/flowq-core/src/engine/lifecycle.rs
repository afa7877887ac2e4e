//! Worker-facing transitions: take a job, finish it, fail it, retry it, and
//! release delayed jobs.

use serde_json::Value;
use tracing::{debug, info};

use super::cascade;
use super::dependency;
use super::placement::{self, ListEnd};
use super::query;
use crate::domain::job::fields;
use crate::domain::{
    EventKind, FlowError, FlowResult, JobKey, JobOptions, JobState, ParentFailurePolicy,
    QueueEvent, QueueKeys, RemovalMode,
};
use crate::ports::StoreOps;

/// Outcome of a failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Attempts remain; the job is waiting again.
    Retried,
    /// The job moved to `failed`.
    Failed,
}

/// Take the next waiting job. Returns `None` when the queue is paused or
/// nothing is waiting.
pub fn move_to_active(ops: &mut dyn StoreOps, keys: &QueueKeys, now: i64) -> Option<JobKey> {
    if placement::is_paused(ops, keys) {
        return None;
    }
    let id = ops.rpop(&keys.wait())?;
    let key = keys.job(&id);

    ops.lpush(&keys.active(), &id);
    let attempts = attempts_made(ops, &key) + 1;
    ops.hset(key.as_str(), fields::ATTEMPTS_MADE, &attempts.to_string());
    ops.hset(key.as_str(), fields::PROCESSED_ON, &now.to_string());
    placement::emit(
        ops,
        keys,
        QueueEvent::new(EventKind::Active).job(&id).prev(JobState::Wait),
    );
    debug!(job = %key, attempts, "job active");
    Some(key)
}

/// Finish an active job with `value`.
///
/// A job with a parent resolves its dependency in soft mode, then stores its
/// result in the parent's processed map.
pub fn move_to_completed(
    ops: &mut dyn StoreOps,
    keys: &QueueKeys,
    now: i64,
    id: &str,
    value: &Value,
) -> FlowResult<()> {
    let key = take_active(ops, keys, id)?;
    let encoded = serde_json::to_string(value)?;

    ops.zadd(&keys.completed(), now, id);
    ops.hset(key.as_str(), fields::RETURN_VALUE, &encoded);
    ops.hset(key.as_str(), fields::FINISHED_ON, &now.to_string());
    placement::emit(
        ops,
        keys,
        QueueEvent::new(EventKind::Completed)
            .job(id)
            .with("returnvalue", encoded.clone())
            .prev(JobState::Active),
    );
    info!(job = %key, "job completed");

    if let Some(parent) = stored_parent(ops, &key) {
        let was_pending = dependency::is_pending(ops, &parent, &key);
        cascade::remove_parent_dependency_key(
            ops,
            &key,
            RemovalMode::SoftResolve,
            Some(&parent),
            keys.prefix(),
        );
        if was_pending {
            dependency::record_processed(ops, &parent, &key, &encoded);
        }
    }
    Ok(())
}

/// Report a failed attempt of an active job.
pub fn move_to_failed(
    ops: &mut dyn StoreOps,
    keys: &QueueKeys,
    now: i64,
    id: &str,
    reason: &str,
) -> FlowResult<FailOutcome> {
    let key = take_active(ops, keys, id)?;
    let opts = job_options(ops, &key)?;
    let attempts = attempts_made(ops, &key);
    ops.hset(key.as_str(), fields::FAILED_REASON, reason);

    if attempts < opts.attempts {
        placement::push_ready(ops, keys, id, ListEnd::Back);
        placement::emit(
            ops,
            keys,
            QueueEvent::new(EventKind::Waiting)
                .job(id)
                .with("failedReason", reason)
                .prev(JobState::Failed),
        );
        info!(job = %key, attempts, max = opts.attempts, reason, "job failed; retrying");
        return Ok(FailOutcome::Retried);
    }

    ops.zadd(&keys.failed(), now, id);
    ops.hset(key.as_str(), fields::FINISHED_ON, &now.to_string());
    placement::emit(
        ops,
        keys,
        QueueEvent::new(EventKind::Failed)
            .job(id)
            .with("failedReason", reason)
            .prev(JobState::Active),
    );
    info!(job = %key, attempts, reason, "job failed");

    if opts.on_parent_failure == ParentFailurePolicy::Ignore
        && let Some(parent) = stored_parent(ops, &key)
    {
        cascade::remove_parent_dependency_key(
            ops,
            &key,
            RemovalMode::SoftResolve,
            Some(&parent),
            keys.prefix(),
        );
    }
    Ok(FailOutcome::Failed)
}

/// Move a failed job back to the ready list with a fresh attempt budget.
pub fn retry_job(ops: &mut dyn StoreOps, keys: &QueueKeys, id: &str) -> FlowResult<()> {
    let key = keys.job(id);
    if !ops.exists(key.as_str()) {
        return Err(FlowError::JobNotFound(id.to_string()));
    }
    if !ops.zrem(&keys.failed(), id) {
        let actual = query::get_state(ops, keys, id);
        return Err(FlowError::unexpected_state(id, JobState::Failed, actual));
    }

    ops.hset(key.as_str(), fields::ATTEMPTS_MADE, "0");
    ops.hdel(key.as_str(), fields::FAILED_REASON);
    ops.hdel(key.as_str(), fields::FINISHED_ON);
    placement::push_ready(ops, keys, id, ListEnd::Back);
    placement::emit(
        ops,
        keys,
        QueueEvent::new(EventKind::Waiting).job(id).prev(JobState::Failed),
    );
    Ok(())
}

/// Release every delayed job due at `now`. Returns how many moved.
pub fn promote_delayed(ops: &mut dyn StoreOps, keys: &QueueKeys, now: i64) -> usize {
    let due = ops.zrange_by_score(&keys.delayed(), now);
    for (id, _) in &due {
        ops.zrem(&keys.delayed(), id);
        placement::push_ready(ops, keys, id, ListEnd::Back);
        placement::emit(
            ops,
            keys,
            QueueEvent::new(EventKind::Waiting).job(id).prev(JobState::Delayed),
        );
    }
    due.len()
}

/// Remove `id` from `active`, or explain where it is instead.
fn take_active(ops: &mut dyn StoreOps, keys: &QueueKeys, id: &str) -> FlowResult<JobKey> {
    let key = keys.job(id);
    if !ops.exists(key.as_str()) {
        return Err(FlowError::JobNotFound(id.to_string()));
    }
    if ops.lrem(&keys.active(), id) == 0 {
        let actual = query::get_state(ops, keys, id);
        return Err(FlowError::unexpected_state(id, JobState::Active, actual));
    }
    Ok(key)
}

fn attempts_made(ops: &dyn StoreOps, key: &JobKey) -> u32 {
    ops.hget(key.as_str(), fields::ATTEMPTS_MADE)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default()
}

fn job_options(ops: &dyn StoreOps, key: &JobKey) -> FlowResult<JobOptions> {
    match ops.hget(key.as_str(), fields::OPTS) {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(JobOptions::default()),
    }
}

/// Parent named by the job's own hash; existence is not checked here.
fn stored_parent(ops: &dyn StoreOps, key: &JobKey) -> Option<JobKey> {
    ops.hget(key.as_str(), fields::PARENT_KEY)
        .and_then(|raw| JobKey::parse(&raw))
}
