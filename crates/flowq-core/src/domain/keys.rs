//! Key schema: queue prefixes and job keys.
//!
//! A queue prefix looks like `flowq:emails:` and a job key is the prefix
//! followed by the job id. Job ids never contain `:`, so a job key can always
//! be split back into its prefix (namespace) and id.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{FlowError, FlowResult};
use super::state::JobState;

pub const SEPARATOR: char = ':';

/// Check that `id` can be embedded in a job key.
pub fn validate_job_id(id: &str) -> FlowResult<()> {
    if id.is_empty() || id.contains(SEPARATOR) {
        return Err(FlowError::InvalidJobId(id.to_string()));
    }
    Ok(())
}

/// Fully qualified key of a job hash (`<prefix><id>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn new(prefix: &str, id: &str) -> Self {
        Self(format!("{prefix}{id}"))
    }

    /// Parse a stored key. Returns `None` for empty strings and for keys
    /// without a namespace or without an id part.
    pub fn parse(raw: &str) -> Option<Self> {
        let pos = raw.rfind(SEPARATOR)?;
        if pos == 0 || pos + 1 == raw.len() {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id part: everything after the last `:`.
    pub fn id(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }

    /// Namespace prefix, including the trailing `:`.
    pub fn prefix(&self) -> &str {
        &self.0[..self.0.len() - self.id().len()]
    }

    /// Keys of the queue this job belongs to.
    pub fn queue(&self) -> QueueKeys {
        QueueKeys::from_prefix(self.prefix())
    }

    pub fn dependencies(&self) -> String {
        format!("{}:dependencies", self.0)
    }

    pub fn processed(&self) -> String {
        format!("{}:processed", self.0)
    }

    pub fn logs(&self) -> String {
        format!("{}:logs", self.0)
    }

    /// Every key owned by the job itself.
    pub fn owned_keys(&self) -> [String; 4] {
        [self.0.clone(), self.logs(), self.dependencies(), self.processed()]
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container keys of one queue namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    /// `QueueKeys::new("flowq", "emails")` has prefix `flowq:emails:`.
    pub fn new(root: &str, queue: &str) -> Self {
        Self {
            prefix: format!("{root}{SEPARATOR}{queue}{SEPARATOR}"),
        }
    }

    pub fn from_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn job(&self, id: &str) -> JobKey {
        JobKey::new(&self.prefix, id)
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    /// Container key for a state (`None` for `Unknown`).
    pub fn state(&self, state: JobState) -> Option<String> {
        state.key_suffix().map(|suffix| self.key(suffix))
    }

    pub fn wait(&self) -> String {
        self.key("wait")
    }

    pub fn active(&self) -> String {
        self.key("active")
    }

    pub fn paused(&self) -> String {
        self.key("paused")
    }

    pub fn delayed(&self) -> String {
        self.key("delayed")
    }

    pub fn waiting_children(&self) -> String {
        self.key("waiting-children")
    }

    pub fn completed(&self) -> String {
        self.key("completed")
    }

    pub fn failed(&self) -> String {
        self.key("failed")
    }

    pub fn events(&self) -> String {
        self.key("events")
    }

    pub fn meta(&self) -> String {
        self.key("meta")
    }
}

impl fmt::Display for QueueKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}
