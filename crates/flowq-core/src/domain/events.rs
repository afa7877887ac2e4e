//! Events - キューのイベントストリーム
//!
//! 状態を変える遷移は `<prefix>events` に 1 エントリを追記します。
//! エントリは append-only stream に載るようにフラットなフィールド列です:
//! `event`、任意の `jobId`、任意の `prev`、それにイベント固有のフィールド。

use std::fmt;

use super::state::JobState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Duplicated,
    Waiting,
    WaitingChildren,
    Delayed,
    Active,
    Progress,
    Completed,
    Failed,
    Removed,
    Paused,
    Resumed,
}

impl EventKind {
    const ALL: [EventKind; 12] = [
        EventKind::Added,
        EventKind::Duplicated,
        EventKind::Waiting,
        EventKind::WaitingChildren,
        EventKind::Delayed,
        EventKind::Active,
        EventKind::Progress,
        EventKind::Completed,
        EventKind::Failed,
        EventKind::Removed,
        EventKind::Paused,
        EventKind::Resumed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Duplicated => "duplicated",
            EventKind::Waiting => "waiting",
            EventKind::WaitingChildren => "waiting-children",
            EventKind::Delayed => "delayed",
            EventKind::Active => "active",
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Removed => "removed",
            EventKind::Paused => "paused",
            EventKind::Resumed => "resumed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event, as written to or read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEvent {
    pub event: EventKind,
    pub job_id: Option<String>,
    /// State the job is leaving.
    pub prev: Option<JobState>,
    pub extra: Vec<(String, String)>,
}

impl QueueEvent {
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            job_id: None,
            prev: None,
            extra: Vec::new(),
        }
    }

    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn prev(mut self, state: JobState) -> Self {
        self.prev = Some(state);
        self
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((field.into(), value.into()));
        self
    }

    /// Extra field lookup.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut out = vec![("event".to_string(), self.event.as_str().to_string())];
        if let Some(job_id) = &self.job_id {
            out.push(("jobId".to_string(), job_id.clone()));
        }
        out.extend(self.extra.iter().cloned());
        if let Some(prev) = self.prev {
            out.push(("prev".to_string(), prev.as_str().to_string()));
        }
        out
    }

    /// Decode a stream entry. Entries with an unknown `event` are skipped.
    pub fn from_fields(entry: &[(String, String)]) -> Option<Self> {
        let mut event = None;
        let mut decoded = QueueEvent::new(EventKind::Added);
        for (field, value) in entry {
            match field.as_str() {
                "event" => event = EventKind::from_name(value),
                "jobId" => decoded.job_id = Some(value.clone()),
                "prev" => decoded.prev = JobState::from_name(value),
                _ => decoded.extra.push((field.clone(), value.clone())),
            }
        }
        decoded.event = event?;
        Some(decoded)
    }
}

/// An event together with its stream id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub id: String,
    pub event: QueueEvent,
}
