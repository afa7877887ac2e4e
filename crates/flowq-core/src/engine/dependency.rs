//! Dependency tracker: per-parent dependency set and processed map.
//!
//! Design:
//! - `<parent>:dependencies` holds child keys that are still pending.
//! - `<parent>:processed` maps child key -> JSON result of finished children.
//! - Invariant: the dependency set only shrinks after construction, and each
//!   child is removed from it at most once. The first successful removal is
//!   the only one that can trigger a promotion.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::domain::JobKey;
use crate::domain::job::fields;
use crate::ports::StoreOps;

/// Result of resolving one child against its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The child was not pending (already resolved, or never registered).
    NotPending,
    /// The child was removed; this many dependencies remain.
    Pending(usize),
    /// The child was the last pending dependency.
    Resolved,
}

impl Resolution {
    /// Did this call change the dependency set?
    pub fn had_effect(self) -> bool {
        !matches!(self, Resolution::NotPending)
    }
}

/// Register `child` as a pending dependency of `parent`.
pub fn add_dependency(ops: &mut dyn StoreOps, parent: &JobKey, child: &JobKey) -> bool {
    ops.sadd(&parent.dependencies(), child.as_str())
}

/// Remove `child` from the parent's processed map (whether or not present)
/// and from its dependency set, then report what is left.
pub fn resolve_child(ops: &mut dyn StoreOps, parent: &JobKey, child: &JobKey) -> Resolution {
    ops.hdel(&parent.processed(), child.as_str());

    let dependencies = parent.dependencies();
    if !ops.srem(&dependencies, child.as_str()) {
        debug!(parent = %parent, child = %child, "dependency already resolved");
        return Resolution::NotPending;
    }

    match ops.scard(&dependencies) {
        0 => Resolution::Resolved,
        remaining => Resolution::Pending(remaining),
    }
}

pub fn is_pending(ops: &dyn StoreOps, parent: &JobKey, child: &JobKey) -> bool {
    ops.sismember(&parent.dependencies(), child.as_str())
}

/// Store a finished child's result under the parent.
pub fn record_processed(ops: &mut dyn StoreOps, parent: &JobKey, child: &JobKey, value: &str) {
    ops.hset(&parent.processed(), child.as_str(), value);
}

/// Recover the parent from the job's stored back-reference.
///
/// Returns `None` when the field is absent or empty, malformed, or points to
/// a job hash that no longer exists (the parent was removed concurrently).
pub fn recover_parent(ops: &dyn StoreOps, job: &JobKey) -> Option<JobKey> {
    let raw = ops.hget(job.as_str(), fields::PARENT_KEY)?;
    let parent = JobKey::parse(&raw)?;
    if !ops.exists(parent.as_str()) {
        debug!(job = %job, parent = %parent, "stale parent reference");
        return None;
    }
    Some(parent)
}

/// Pending and processed children of a parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependencies {
    pub pending: Vec<JobKey>,
    pub processed: HashMap<JobKey, Value>,
}

pub fn dependencies(ops: &dyn StoreOps, parent: &JobKey) -> Dependencies {
    let pending = ops
        .smembers(&parent.dependencies())
        .iter()
        .filter_map(|raw| JobKey::parse(raw))
        .collect();
    let processed = ops
        .hgetall(&parent.processed())
        .into_iter()
        .filter_map(|(raw, value)| {
            let key = JobKey::parse(&raw)?;
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            Some((key, value))
        })
        .collect();
    Dependencies { pending, processed }
}
