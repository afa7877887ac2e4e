//! Queue-level controls (pause and resume) and per-job reporting (progress,
//! log lines).

use serde_json::Value;
use tracing::info;

use super::placement;
use crate::domain::job::fields;
use crate::domain::{EventKind, FlowError, FlowResult, JobKey, QueueEvent, QueueKeys};
use crate::ports::StoreOps;

const PAUSED_FIELD: &str = "paused";

/// Pause the queue: set the flag and move `wait` into `paused`, order kept.
/// Returns false if it was already paused.
pub fn pause(ops: &mut dyn StoreOps, keys: &QueueKeys) -> bool {
    if placement::is_paused(ops, keys) {
        return false;
    }
    ops.hset(&keys.meta(), PAUSED_FIELD, "1");
    let moved = move_list(ops, &keys.wait(), &keys.paused());
    placement::emit(ops, keys, QueueEvent::new(EventKind::Paused));
    info!(queue = %keys, moved, "queue paused");
    true
}

/// Undo [`pause`]. Returns false if the queue was not paused.
pub fn resume(ops: &mut dyn StoreOps, keys: &QueueKeys) -> bool {
    if !placement::is_paused(ops, keys) {
        return false;
    }
    ops.hdel(&keys.meta(), PAUSED_FIELD);
    let moved = move_list(ops, &keys.paused(), &keys.wait());
    placement::emit(ops, keys, QueueEvent::new(EventKind::Resumed));
    info!(queue = %keys, moved, "queue resumed");
    true
}

fn move_list(ops: &mut dyn StoreOps, from: &str, to: &str) -> usize {
    let items = ops.lrange(from);
    ops.del(&[from.to_string()]);
    for item in &items {
        ops.rpush(to, item);
    }
    items.len()
}

pub fn update_progress(ops: &mut dyn StoreOps, keys: &QueueKeys, id: &str, progress: &Value) -> FlowResult<()> {
    let key = existing(ops, keys, id)?;
    let encoded = serde_json::to_string(progress)?;
    ops.hset(key.as_str(), fields::PROGRESS, &encoded);
    placement::emit(
        ops,
        keys,
        QueueEvent::new(EventKind::Progress).job(id).with("data", encoded),
    );
    Ok(())
}

/// Append a log line. Returns the number of lines now stored.
pub fn add_log(ops: &mut dyn StoreOps, keys: &QueueKeys, id: &str, entry: &str) -> FlowResult<usize> {
    let key = existing(ops, keys, id)?;
    Ok(ops.rpush(&key.logs(), entry))
}

fn existing(ops: &dyn StoreOps, keys: &QueueKeys, id: &str) -> FlowResult<JobKey> {
    let key = keys.job(id);
    if ops.exists(key.as_str()) {
        Ok(key)
    } else {
        Err(FlowError::JobNotFound(id.to_string()))
    }
}
