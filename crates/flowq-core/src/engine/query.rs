//! Read-only views over a queue namespace.

use crate::domain::{FlowResult, JobRecord, JobState, QueueEvent, QueueKeys, RecordedEvent};
use crate::observability::QueueCounts;
use crate::ports::StoreOps;

pub use super::dependency::{Dependencies, dependencies};

/// Load a job's hash, or `None` if it does not exist.
pub fn get_job(ops: &dyn StoreOps, keys: &QueueKeys, id: &str) -> FlowResult<Option<JobRecord>> {
    let key = keys.job(id);
    let raw = ops.hgetall(key.as_str());
    if raw.is_empty() {
        return Ok(None);
    }
    JobRecord::from_fields(key, &raw).map(Some)
}

/// Find the container that currently holds `id`.
///
/// Membership, not the hash, is what defines state; a job found nowhere is
/// `Unknown`.
pub fn get_state(ops: &dyn StoreOps, keys: &QueueKeys, id: &str) -> JobState {
    JobState::TRACKED
        .into_iter()
        .find(|state| in_state(ops, keys, id, *state))
        .unwrap_or(JobState::Unknown)
}

fn in_state(ops: &dyn StoreOps, keys: &QueueKeys, id: &str, state: JobState) -> bool {
    let Some(container) = keys.state(state) else {
        return false;
    };
    match state.shape() {
        Some(crate::domain::ContainerShape::List) => ops.lcontains(&container, id),
        Some(crate::domain::ContainerShape::OrderedSet) => ops.zscore(&container, id).is_some(),
        None => false,
    }
}

pub fn counts(ops: &dyn StoreOps, keys: &QueueKeys) -> QueueCounts {
    QueueCounts {
        waiting: ops.llen(&keys.wait()),
        active: ops.llen(&keys.active()),
        delayed: ops.zcard(&keys.delayed()),
        paused: ops.llen(&keys.paused()),
        waiting_children: ops.zcard(&keys.waiting_children()),
        completed: ops.zcard(&keys.completed()),
        failed: ops.zcard(&keys.failed()),
    }
}

/// Events appended after `after` (all of them when `None`), oldest first.
/// Entries that do not decode are skipped.
pub fn events(ops: &dyn StoreOps, keys: &QueueKeys, after: Option<&str>) -> Vec<RecordedEvent> {
    ops.xrange(&keys.events(), after)
        .into_iter()
        .filter_map(|entry| {
            let event = QueueEvent::from_fields(&entry.fields)?;
            Some(RecordedEvent { id: entry.id, event })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, JobOptions};
    use crate::impls::Keyspace;
    use rstest::rstest;
    use serde_json::json;

    fn keys() -> QueueKeys {
        QueueKeys::new("flowq", "q")
    }

    #[rstest]
    #[case::waiting(JobState::Wait)]
    #[case::paused(JobState::Paused)]
    #[case::active(JobState::Active)]
    #[case::delayed(JobState::Delayed)]
    #[case::blocked(JobState::WaitingChildren)]
    #[case::completed(JobState::Completed)]
    #[case::failed(JobState::Failed)]
    fn state_follows_container_membership(#[case] state: JobState) {
        let mut ks = Keyspace::new();
        let container = keys().state(state).unwrap();
        match state.shape() {
            Some(crate::domain::ContainerShape::List) => {
                ks.lpush(&container, "1");
            }
            _ => {
                ks.zadd(&container, 0, "1");
            }
        }

        assert_eq!(get_state(&ks, &keys(), "1"), state);
    }

    #[test]
    fn missing_job_is_unknown() {
        let ks = Keyspace::new();
        assert_eq!(get_state(&ks, &keys(), "1"), JobState::Unknown);
        assert!(get_job(&ks, &keys(), "1").unwrap().is_none());
    }

    #[test]
    fn get_job_reads_the_hash_back() {
        let mut ks = Keyspace::new();
        let record = JobRecord::new(keys().job("1"), "email", json!({"to": "a"}), JobOptions::default(), 7);
        ks.hset_all(record.key.as_str(), &record.to_fields().unwrap());

        let loaded = get_job(&ks, &keys(), "1").unwrap().unwrap();
        assert_eq!(loaded.name, "email");
        assert_eq!(loaded.data, json!({"to": "a"}));
        assert_eq!(loaded.timestamp, 7);
    }

    #[test]
    fn events_resume_after_a_cursor() {
        let mut ks = Keyspace::new();
        let first = ks.xadd(&keys().events(), QueueEvent::new(EventKind::Added).job("1").to_fields());
        ks.xadd(&keys().events(), QueueEvent::new(EventKind::Waiting).job("1").to_fields());

        let all = events(&ks, &keys(), None);
        let rest = events(&ks, &keys(), Some(&first));

        assert_eq!(all.len(), 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event.event, EventKind::Waiting);
    }

    #[test]
    fn counts_cover_every_container() {
        let mut ks = Keyspace::new();
        ks.lpush(&keys().wait(), "1");
        ks.lpush(&keys().wait(), "2");
        ks.zadd(&keys().waiting_children(), 0, "3");
        ks.zadd(&keys().failed(), 0, "4");

        let counts = counts(&ks, &keys());
        assert_eq!(counts.waiting, 2);
        assert_eq!(counts.waiting_children, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.active, 0);
    }
}
