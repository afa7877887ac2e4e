//! State - ジョブのライフサイクル状態
//!
//! `Unknown` 以外の状態は、queue prefix の下にちょうど 1 つのコンテナキーを持ちます。
//! ジョブが同時に属するコンテナは高々 1 つです。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape of the container that backs a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerShape {
    List,
    OrderedSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    #[serde(rename = "waiting")]
    Wait,
    Active,
    Delayed,
    Paused,
    WaitingChildren,
    Completed,
    Failed,
    /// Not held by any state container (removed, or never added).
    Unknown,
}

impl JobState {
    /// States that own a container, in the order `get_state` probes them.
    pub const TRACKED: [JobState; 7] = [
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
        JobState::Active,
        JobState::Wait,
        JobState::Paused,
        JobState::WaitingChildren,
    ];

    /// Name used in events and status views.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Wait => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Paused => "paused",
            JobState::WaitingChildren => "waiting-children",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        }
    }

    /// Inverse of [`JobState::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        JobState::TRACKED
            .into_iter()
            .chain([JobState::Unknown])
            .find(|state| state.as_str() == name)
    }

    /// Suffix of the container key under the queue prefix.
    pub fn key_suffix(self) -> Option<&'static str> {
        match self {
            JobState::Wait => Some("wait"),
            JobState::Active => Some("active"),
            JobState::Delayed => Some("delayed"),
            JobState::Paused => Some("paused"),
            JobState::WaitingChildren => Some("waiting-children"),
            JobState::Completed => Some("completed"),
            JobState::Failed => Some("failed"),
            JobState::Unknown => None,
        }
    }

    pub fn shape(self) -> Option<ContainerShape> {
        match self {
            JobState::Wait | JobState::Active | JobState::Paused => Some(ContainerShape::List),
            JobState::Delayed
            | JobState::WaitingChildren
            | JobState::Completed
            | JobState::Failed => Some(ContainerShape::OrderedSet),
            JobState::Unknown => None,
        }
    }

    /// Is this a terminal state (retained until removed)?
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tracked_state_has_a_container() {
        for state in JobState::TRACKED {
            assert!(state.key_suffix().is_some(), "{state} has no key");
            assert!(state.shape().is_some(), "{state} has no shape");
        }
        assert!(JobState::Unknown.key_suffix().is_none());
    }

    #[test]
    fn wait_is_reported_as_waiting() {
        assert_eq!(JobState::Wait.as_str(), "waiting");
        assert_eq!(JobState::Wait.key_suffix(), Some("wait"));
        assert_eq!(
            serde_json::to_string(&JobState::WaitingChildren).unwrap(),
            "\"waiting-children\""
        );
        assert_eq!(serde_json::to_string(&JobState::Wait).unwrap(), "\"waiting\"");
    }

    #[test]
    fn names_parse_back() {
        for state in JobState::TRACKED {
            assert_eq!(JobState::from_name(state.as_str()), Some(state));
        }
        assert_eq!(JobState::from_name("wait"), None);
    }
}
