//! Promotion / cascade controller and the removal entry point.
//!
//! `remove_parent_dependency_key` is what the completion transition (soft
//! mode) and the removal transition (hard mode) call when a child leaves the
//! graph. It walks up the `parentKey` chain iteratively:
//!
//! 1. resolve the child against its parent (no-op if already resolved)
//! 2. stop unless that was the parent's last dependency
//! 3. take the parent out of `waiting-children`
//! 4. promote it and stop, or (hard mode, same namespace) schedule it for
//!    deletion and continue with the parent as the new child
//!
//! All of it runs inside one atomic invocation, so the set mutation, the
//! cardinality check and the decision cannot interleave with another caller.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::dependency::{self, Resolution};
use super::placement::{self, ListEnd};
use crate::domain::{EventKind, JobKey, JobState, ParentAction, QueueEvent, RemovalMode};
use crate::ports::StoreOps;

/// What the walk did at each ancestor it reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// Ancestors whose keys were deleted, nearest first.
    pub deleted: Vec<JobKey>,
    /// Ancestor that was moved to `wait`/`paused`, if any.
    pub promoted: Option<(JobKey, JobState)>,
}

/// Removal entry point.
///
/// `parent_key` is used as-is when given; otherwise the parent is recovered
/// from `job_key`'s stored back-reference and must still exist. `base_key` is
/// the namespace prefix the removal started in; hard deletion never leaves it.
pub fn remove_parent_dependency_key(
    ops: &mut dyn StoreOps,
    job_key: &JobKey,
    mode: RemovalMode,
    parent_key: Option<&JobKey>,
    base_key: &str,
) {
    let outcome = cascade(ops, job_key, mode, parent_key, base_key);
    if !outcome.deleted.is_empty() || outcome.promoted.is_some() {
        info!(
            job = %job_key,
            ?mode,
            deleted = outcome.deleted.len(),
            promoted = outcome.promoted.as_ref().map(|(key, _)| key.as_str()),
            "dependency cascade"
        );
    }
}

/// Same as [`remove_parent_dependency_key`], reporting what happened.
pub fn cascade(
    ops: &mut dyn StoreOps,
    job_key: &JobKey,
    mode: RemovalMode,
    parent_key: Option<&JobKey>,
    base_key: &str,
) -> CascadeOutcome {
    let mut outcome = CascadeOutcome::default();
    let mut visited = HashSet::from([job_key.clone()]);
    let mut child = job_key.clone();
    let mut next_parent = match parent_key {
        Some(parent) => Some(parent.clone()),
        None => dependency::recover_parent(ops, job_key),
    };

    while let Some(parent) = next_parent.take() {
        if !visited.insert(parent.clone()) {
            warn!(job = %job_key, parent = %parent, "parent chain revisits a job; stopping cascade");
            break;
        }

        match dependency::resolve_child(ops, &parent, &child) {
            Resolution::Resolved => {}
            Resolution::Pending(remaining) => {
                debug!(parent = %parent, remaining, "parent still has pending dependencies");
                break;
            }
            Resolution::NotPending => break,
        }

        let parent_keys = parent.queue();
        ops.zrem(&parent_keys.waiting_children(), parent.id());

        match mode.action_for(parent.prefix() == base_key) {
            ParentAction::Promote { emit_event } => {
                let state = promote(ops, &parent, emit_event);
                outcome.promoted = Some((parent, state));
            }
            ParentAction::DeleteAndContinue => {
                // The grandparent is read before anything is deleted.
                next_parent = dependency::recover_parent(ops, &parent);
                outcome.deleted.push(parent.clone());
                child = parent;
            }
        }
    }

    for key in &outcome.deleted {
        placement::remove_job_keys(ops, key);
    }
    outcome
}

/// Move a fully resolved parent to the front of `wait` (or `paused`).
fn promote(ops: &mut dyn StoreOps, parent: &JobKey, emit_event: bool) -> JobState {
    let keys = parent.queue();
    let state = placement::push_ready(ops, &keys, parent.id(), ListEnd::Front);
    if emit_event {
        placement::emit(
            ops,
            &keys,
            QueueEvent::new(EventKind::Active)
                .job(parent.id())
                .prev(JobState::WaitingChildren),
        );
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::fields;
    use crate::domain::{QueueEvent, QueueKeys};
    use crate::impls::Keyspace;
    use rstest::rstest;

    fn ns(name: &str) -> QueueKeys {
        QueueKeys::new("flowq", name)
    }

    /// Store a job hash, optionally linked to a parent.
    fn seed_job(ks: &mut Keyspace, key: &JobKey, parent: Option<&JobKey>) {
        ks.hset(key.as_str(), fields::NAME, "job");
        if let Some(parent) = parent {
            ks.hset(key.as_str(), fields::PARENT_KEY, parent.as_str());
            ks.sadd(&parent.dependencies(), key.as_str());
        }
    }

    /// Put a parent into `waiting-children`.
    fn block(ks: &mut Keyspace, key: &JobKey) {
        ks.zadd(&key.queue().waiting_children(), 0, key.id());
    }

    fn events(ks: &Keyspace, keys: &QueueKeys) -> Vec<QueueEvent> {
        ks.xrange(&keys.events(), None)
            .iter()
            .filter_map(|entry| QueueEvent::from_fields(&entry.fields))
            .collect()
    }

    /// A <- {B, C} in one namespace, A blocked.
    fn parent_with_two_children(ks: &mut Keyspace, keys: &QueueKeys) -> (JobKey, JobKey, JobKey) {
        let (a, b, c) = (keys.job("A"), keys.job("B"), keys.job("C"));
        seed_job(ks, &a, None);
        seed_job(ks, &b, Some(&a));
        seed_job(ks, &c, Some(&a));
        block(ks, &a);
        (a, b, c)
    }

    #[test]
    fn soft_resolution_promotes_after_last_child() {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let (a, b, c) = parent_with_two_children(&mut ks, &keys);

        remove_parent_dependency_key(&mut ks, &b, RemovalMode::SoftResolve, Some(&a), keys.prefix());
        assert_eq!(ks.scard(&a.dependencies()), 1);
        assert_eq!(ks.llen(&keys.wait()), 0);
        assert!(events(&ks, &keys).is_empty());

        remove_parent_dependency_key(&mut ks, &c, RemovalMode::SoftResolve, Some(&a), keys.prefix());
        assert_eq!(ks.scard(&a.dependencies()), 0);
        assert_eq!(ks.zscore(&keys.waiting_children(), "A"), None);
        assert_eq!(ks.lrange(&keys.wait()), vec!["A"]);
        assert_eq!(
            events(&ks, &keys),
            vec![QueueEvent::new(EventKind::Active).job("A").prev(JobState::WaitingChildren)]
        );
    }

    #[test]
    fn duplicate_resolution_promotes_once() {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let (a, b, c) = parent_with_two_children(&mut ks, &keys);

        for _ in 0..3 {
            remove_parent_dependency_key(&mut ks, &b, RemovalMode::SoftResolve, Some(&a), keys.prefix());
            remove_parent_dependency_key(&mut ks, &c, RemovalMode::SoftResolve, Some(&a), keys.prefix());
        }

        assert_eq!(ks.lrange(&keys.wait()), vec!["A"]);
        assert_eq!(events(&ks, &keys).len(), 1);
    }

    #[rstest]
    #[case(&["B", "C", "D"])]
    #[case(&["D", "B", "C"])]
    #[case(&["C", "D", "B"])]
    fn any_resolution_order_promotes_exactly_once(#[case] order: &[&str]) {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let a = keys.job("A");
        seed_job(&mut ks, &a, None);
        block(&mut ks, &a);
        for id in ["B", "C", "D"] {
            seed_job(&mut ks, &keys.job(id), Some(&a));
        }

        let mut promotions = 0;
        for id in order {
            let outcome = cascade(&mut ks, &keys.job(id), RemovalMode::SoftResolve, None, keys.prefix());
            promotions += usize::from(outcome.promoted.is_some());
        }

        assert_eq!(promotions, 1);
        assert_eq!(ks.lrange(&keys.wait()), vec!["A"]);
    }

    #[rstest]
    #[case::running(false, JobState::Wait)]
    #[case::paused(true, JobState::Paused)]
    fn promotion_follows_pause_flag(#[case] paused: bool, #[case] expected: JobState) {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let (a, b, c) = parent_with_two_children(&mut ks, &keys);
        if paused {
            ks.hset(&keys.meta(), "paused", "1");
        }

        cascade(&mut ks, &b, RemovalMode::SoftResolve, Some(&a), keys.prefix());
        let outcome = cascade(&mut ks, &c, RemovalMode::SoftResolve, Some(&a), keys.prefix());

        assert_eq!(outcome.promoted, Some((a, expected)));
        assert_eq!(ks.llen(&keys.wait()), usize::from(!paused));
        assert_eq!(ks.llen(&keys.paused()), usize::from(paused));
    }

    #[test]
    fn hard_cascade_deletes_empty_ancestors_in_same_namespace() {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let g = keys.job("G");
        seed_job(&mut ks, &g, None);
        block(&mut ks, &g);
        let (a, b, c) = (keys.job("A"), keys.job("B"), keys.job("C"));
        seed_job(&mut ks, &a, Some(&g));
        block(&mut ks, &a);
        seed_job(&mut ks, &b, Some(&a));
        seed_job(&mut ks, &c, Some(&a));
        ks.rpush(&a.logs(), "started");
        ks.hset(&a.processed(), "stale", "1");

        let first = cascade(&mut ks, &b, RemovalMode::HardDeleteCascade, None, keys.prefix());
        assert_eq!(first, CascadeOutcome::default());

        let second = cascade(&mut ks, &c, RemovalMode::HardDeleteCascade, None, keys.prefix());
        assert_eq!(second.deleted, vec![a.clone(), g.clone()]);
        assert_eq!(second.promoted, None);

        for key in a.owned_keys().iter().chain(g.owned_keys().iter()) {
            assert!(!ks.exists(key), "{key} should be gone");
        }
        assert_eq!(ks.zcard(&keys.waiting_children()), 0);
        assert_eq!(ks.llen(&keys.wait()), 0);
        assert!(events(&ks, &keys).is_empty());
    }

    #[test]
    fn hard_cascade_stops_at_grandparent_with_other_children() {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let (g, a, sibling, b) = (keys.job("G"), keys.job("A"), keys.job("S"), keys.job("B"));
        seed_job(&mut ks, &g, None);
        block(&mut ks, &g);
        seed_job(&mut ks, &a, Some(&g));
        seed_job(&mut ks, &sibling, Some(&g));
        block(&mut ks, &a);
        seed_job(&mut ks, &b, Some(&a));

        let outcome = cascade(&mut ks, &b, RemovalMode::HardDeleteCascade, None, keys.prefix());

        assert_eq!(outcome.deleted, vec![a.clone()]);
        assert_eq!(ks.smembers(&g.dependencies()), vec![sibling.to_string()]);
        assert_eq!(ks.zscore(&keys.waiting_children(), "G"), Some(0));
    }

    #[test]
    fn hard_cascade_promotes_across_namespace_without_event() {
        let mut ks = Keyspace::new();
        let (origin, other) = (ns("origin"), ns("other"));
        let g = other.job("G");
        seed_job(&mut ks, &g, None);
        block(&mut ks, &g);
        let (a, b, c) = (origin.job("A"), origin.job("B"), origin.job("C"));
        seed_job(&mut ks, &a, Some(&g));
        block(&mut ks, &a);
        seed_job(&mut ks, &b, Some(&a));
        seed_job(&mut ks, &c, Some(&a));

        cascade(&mut ks, &b, RemovalMode::HardDeleteCascade, None, origin.prefix());
        let outcome = cascade(&mut ks, &c, RemovalMode::HardDeleteCascade, None, origin.prefix());

        assert_eq!(outcome.deleted, vec![a.clone()]);
        assert_eq!(outcome.promoted, Some((g.clone(), JobState::Wait)));
        assert!(!ks.exists(a.as_str()));
        assert!(ks.exists(g.as_str()));
        assert_eq!(ks.lrange(&other.wait()), vec!["G"]);
        assert_eq!(ks.zcard(&other.waiting_children()), 0);
        assert!(events(&ks, &other).is_empty());
        assert!(events(&ks, &origin).is_empty());
    }

    #[test]
    fn stale_back_reference_is_a_no_op() {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let (a, b) = (keys.job("A"), keys.job("B"));
        seed_job(&mut ks, &b, Some(&a));
        block(&mut ks, &a);

        let outcome = cascade(&mut ks, &b, RemovalMode::SoftResolve, None, keys.prefix());

        assert_eq!(outcome, CascadeOutcome::default());
        assert_eq!(ks.scard(&a.dependencies()), 1);
        assert_eq!(ks.llen(&keys.wait()), 0);
        assert!(events(&ks, &keys).is_empty());
    }

    #[test]
    fn job_without_parent_is_a_no_op() {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let b = keys.job("B");
        seed_job(&mut ks, &b, None);

        let outcome = cascade(&mut ks, &b, RemovalMode::HardDeleteCascade, None, keys.prefix());
        assert_eq!(outcome, CascadeOutcome::default());
        assert!(ks.exists(b.as_str()));
    }

    #[test]
    fn cyclic_parent_chain_stops() {
        let mut ks = Keyspace::new();
        let keys = ns("q");
        let (a, b) = (keys.job("A"), keys.job("B"));
        // A <- B and B <- A: corrupted data, never produced by add_job/add_flow.
        seed_job(&mut ks, &a, Some(&b));
        seed_job(&mut ks, &b, Some(&a));

        let outcome = cascade(&mut ks, &b, RemovalMode::HardDeleteCascade, None, keys.prefix());

        assert_eq!(outcome.deleted, vec![a]);
    }
}
