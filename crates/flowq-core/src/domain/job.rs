//! Job record and options.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::FlowResult;
use super::keys::JobKey;

/// Field names of the job hash.
pub mod fields {
    pub const NAME: &str = "name";
    pub const DATA: &str = "data";
    pub const OPTS: &str = "opts";
    pub const TIMESTAMP: &str = "timestamp";
    pub const DELAY: &str = "delay";
    pub const PARENT_KEY: &str = "parentKey";
    pub const ATTEMPTS_MADE: &str = "attemptsMade";
    pub const PROCESSED_ON: &str = "processedOn";
    pub const FINISHED_ON: &str = "finishedOn";
    pub const RETURN_VALUE: &str = "returnvalue";
    pub const FAILED_REASON: &str = "failedReason";
    pub const PROGRESS: &str = "progress";
}

/// What happens to the parent when a child fails for good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentFailurePolicy {
    /// The dependency stays pending; the parent stays in `waiting-children`.
    #[default]
    Keep,
    /// The failed child counts as resolved (soft mode).
    Ignore,
}

/// Per-job options stored with the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobOptions {
    /// Explicit id. Generated when absent.
    pub job_id: Option<String>,

    /// Milliseconds to hold the job in `delayed` before it becomes waiting.
    pub delay: u64,

    /// Total number of attempts before the job is moved to `failed`.
    pub attempts: u32,

    pub on_parent_failure: ParentFailurePolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            delay: 0,
            attempts: 1,
            on_parent_failure: ParentFailurePolicy::Keep,
        }
    }
}

impl JobOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = delay_ms;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_parent_failure(mut self, policy: ParentFailurePolicy) -> Self {
        self.on_parent_failure = policy;
        self
    }
}

/// Decoded view of a job hash.
///
/// Design:
/// - The hash in the store is the single source of truth.
/// - State membership is NOT stored here; it lives in the state containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub key: JobKey,
    pub name: String,
    pub data: Value,
    pub opts: JobOptions,
    pub timestamp: i64,
    pub parent_key: Option<JobKey>,
    pub attempts_made: u32,
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    pub return_value: Option<Value>,
    pub failed_reason: Option<String>,
    pub progress: Option<Value>,
}

impl JobRecord {
    pub fn new(key: JobKey, name: impl Into<String>, data: Value, opts: JobOptions, timestamp: i64) -> Self {
        Self {
            key,
            name: name.into(),
            data,
            opts,
            timestamp,
            parent_key: None,
            attempts_made: 0,
            processed_on: None,
            finished_on: None,
            return_value: None,
            failed_reason: None,
            progress: None,
        }
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// Fields written when the job is first stored.
    pub fn to_fields(&self) -> FlowResult<Vec<(String, String)>> {
        let mut out = vec![
            (fields::NAME.to_string(), self.name.clone()),
            (fields::DATA.to_string(), serde_json::to_string(&self.data)?),
            (fields::OPTS.to_string(), serde_json::to_string(&self.opts)?),
            (fields::TIMESTAMP.to_string(), self.timestamp.to_string()),
            (fields::DELAY.to_string(), self.opts.delay.to_string()),
            (fields::ATTEMPTS_MADE.to_string(), self.attempts_made.to_string()),
        ];
        if let Some(parent) = &self.parent_key {
            out.push((fields::PARENT_KEY.to_string(), parent.to_string()));
        }
        Ok(out)
    }

    /// Rebuild a record from the raw hash. Missing numeric fields default to
    /// zero/absent; malformed JSON is an error.
    pub fn from_fields(key: JobKey, raw: &HashMap<String, String>) -> FlowResult<Self> {
        let text = |name: &str| raw.get(name).map(String::as_str);
        let int = |name: &str| text(name).and_then(|v| v.parse::<i64>().ok());
        let json = |name: &str| -> FlowResult<Option<Value>> {
            text(name)
                .map(serde_json::from_str::<Value>)
                .transpose()
                .map_err(Into::into)
        };

        let opts = match text(fields::OPTS) {
            Some(raw_opts) => serde_json::from_str(raw_opts)?,
            None => JobOptions::default(),
        };

        Ok(Self {
            name: text(fields::NAME).unwrap_or_default().to_string(),
            data: json(fields::DATA)?.unwrap_or(Value::Null),
            opts,
            timestamp: int(fields::TIMESTAMP).unwrap_or_default(),
            parent_key: text(fields::PARENT_KEY).and_then(JobKey::parse),
            attempts_made: text(fields::ATTEMPTS_MADE)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            processed_on: int(fields::PROCESSED_ON),
            finished_on: int(fields::FINISHED_ON),
            return_value: json(fields::RETURN_VALUE)?,
            failed_reason: text(fields::FAILED_REASON).map(str::to_string),
            progress: json(fields::PROGRESS)?,
            key,
        })
    }
}
