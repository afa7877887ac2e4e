//! Supervisor <-> child protocol.
//!
//! Every message is one JSON object per line, `{"cmd": ..., "value": ...}`.
//! Nothing that crosses the channel is a Rust error or a closure; failures
//! travel as [`SerializedError`].

use std::any::Any;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FlowResult, JobRecord};
use crate::typed::ProcessorError;

/// The part of a job a child needs to run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub id: String,
    pub name: String,
    pub data: Value,
    pub attempts_made: u32,
}

impl From<&JobRecord> for JobPayload {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id().to_string(),
            name: job.name.clone(),
            data: job.data.clone(),
            attempts_made: job.attempts_made,
        }
    }
}

/// Supervisor to child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "value", rename_all = "kebab-case")]
pub enum ParentMessage {
    /// Resolve the processor to run.
    Init { processor: String },
    Start { job: JobPayload },
    Stop,
}

/// Child to supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "value", rename_all = "kebab-case")]
pub enum ChildMessage {
    InitCompleted,
    InitFailed { err: SerializedError },
    Completed { value: Value },
    Failed { err: SerializedError },
    Progress { value: Value },
    Log { entry: String },
    /// A command was rejected (e.g. `Start` while a job is running).
    Error { err: SerializedError },
}

/// A failure in a form that can be sent over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Message from `Display`, source chain as the stack.
    pub fn from_error(name: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            name: name.into(),
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }

    pub fn from_processor(err: &ProcessorError) -> Self {
        Self::from_error(err.kind(), err)
    }

    /// Coerce an arbitrary value: strings become the message, objects keep
    /// their `name`/`message`/`stack`, anything else is stringified.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::new("Error", message.clone()),
            Value::Object(map) if map.contains_key("message") => {
                let text = |key: &str| map.get(key).map(value_text);
                Self {
                    name: text("name").unwrap_or_else(|| "Error".to_string()),
                    message: text("message").unwrap_or_default(),
                    stack: text("stack"),
                }
            }
            other => Self::new("Error", other.to_string()),
        }
    }

    /// Payload of a caught panic.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "processor panicked".to_string()
        };
        Self::new("Panic", message)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// One line of the protocol, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> FlowResult<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> FlowResult<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}

impl fmt::Display for ParentMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentMessage::Init { processor } => write!(f, "init({processor})"),
            ParentMessage::Start { job } => write!(f, "start({})", job.id),
            ParentMessage::Stop => f.write_str("stop"),
        }
    }
}
