//! Placement helpers shared by the transitions: pause routing, pushing into
//! the ready lists, and deleting a job's own keys.

use crate::domain::{JobKey, JobState, QueueKeys, QueueEvent};
use crate::ports::StoreOps;

/// Presence of `meta.paused` marks the queue as paused.
pub fn is_paused(ops: &dyn StoreOps, keys: &QueueKeys) -> bool {
    ops.hget(&keys.meta(), "paused").is_some()
}

/// `paused` when the queue is paused, `wait` otherwise.
pub fn ready_state(ops: &dyn StoreOps, keys: &QueueKeys) -> JobState {
    if is_paused(ops, keys) {
        JobState::Paused
    } else {
        JobState::Wait
    }
}

/// Which end of the ready list a job enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    /// Behind everything already waiting (new jobs).
    Back,
    /// Next to be taken (promoted parents).
    Front,
}

/// Push `id` into the ready list selected by the pause flag.
///
/// Workers take from the right, so `Back` is a left push and `Front` a
/// right push.
pub fn push_ready(ops: &mut dyn StoreOps, keys: &QueueKeys, id: &str, end: ListEnd) -> JobState {
    let state = ready_state(ops, keys);
    let list = match state {
        JobState::Paused => keys.paused(),
        _ => keys.wait(),
    };
    match end {
        ListEnd::Back => ops.lpush(&list, id),
        ListEnd::Front => ops.rpush(&list, id),
    };
    state
}

/// Delete the job hash together with its logs, dependencies and processed keys.
pub fn remove_job_keys(ops: &mut dyn StoreOps, job: &JobKey) -> usize {
    ops.del(&job.owned_keys())
}

/// Append an event to the queue's stream and return its id.
pub fn emit(ops: &mut dyn StoreOps, keys: &QueueKeys, event: QueueEvent) -> String {
    ops.xadd(&keys.events(), event.to_fields())
}

/// Take `id` out of the container of `state`. Returns false if it was not there.
pub fn remove_from_state(ops: &mut dyn StoreOps, keys: &QueueKeys, id: &str, state: JobState) -> bool {
    let Some(container) = keys.state(state) else {
        return false;
    };
    match state.shape() {
        Some(crate::domain::ContainerShape::List) => ops.lrem(&container, id) > 0,
        Some(crate::domain::ContainerShape::OrderedSet) => ops.zrem(&container, id),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::Keyspace;
    use rstest::rstest;

    #[rstest]
    #[case::running(false, JobState::Wait)]
    #[case::paused(true, JobState::Paused)]
    fn ready_list_follows_pause_flag(#[case] paused: bool, #[case] expected: JobState) {
        let mut ks = Keyspace::new();
        let keys = QueueKeys::new("flowq", "q");
        if paused {
            ks.hset(&keys.meta(), "paused", "1");
        }

        assert_eq!(push_ready(&mut ks, &keys, "1", ListEnd::Back), expected);
        assert_eq!(ks.llen(&keys.wait()), usize::from(!paused));
        assert_eq!(ks.llen(&keys.paused()), usize::from(paused));
    }

    #[test]
    fn front_push_is_taken_first() {
        let mut ks = Keyspace::new();
        let keys = QueueKeys::new("flowq", "q");
        push_ready(&mut ks, &keys, "old", ListEnd::Back);
        push_ready(&mut ks, &keys, "new", ListEnd::Back);
        push_ready(&mut ks, &keys, "parent", ListEnd::Front);

        assert_eq!(ks.rpop(&keys.wait()).as_deref(), Some("parent"));
        assert_eq!(ks.rpop(&keys.wait()).as_deref(), Some("old"));
    }
}
