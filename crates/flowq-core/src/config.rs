//! Queue and logging configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{FlowError, FlowResult, QueueKeys};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(FlowError::config(format!("unknown log format `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `flowq_core=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Root of every key (`<prefix>:<queue>:...`).
    pub prefix: String,
    pub queue: String,
    /// Worker loops per group.
    pub concurrency: usize,
    /// Attempts given to jobs created by the CLI.
    pub max_attempts: u32,
    /// Idle workers re-check the queue at least this often.
    pub poll_interval: Duration,
    pub log: LogConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "flowq".to_string(),
            queue: "default".to_string(),
            concurrency: 1,
            max_attempts: 1,
            poll_interval: Duration::from_millis(1000),
            log: LogConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Read `FLOWQ_*` variables from the process environment.
    pub fn from_env() -> FlowResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FlowResult<Self> {
        let defaults = Self::default();
        let config = Self {
            prefix: lookup("FLOWQ_PREFIX").unwrap_or(defaults.prefix),
            queue: lookup("FLOWQ_QUEUE").unwrap_or(defaults.queue),
            concurrency: parse(&lookup, "FLOWQ_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            max_attempts: parse(&lookup, "FLOWQ_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            poll_interval: parse(&lookup, "FLOWQ_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            log: LogConfig {
                level: lookup("FLOWQ_LOG_LEVEL").unwrap_or(defaults.log.level),
                format: parse(&lookup, "FLOWQ_LOG_FORMAT")?.unwrap_or(defaults.log.format),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.prefix.is_empty() || self.queue.is_empty() {
            return Err(FlowError::config("prefix and queue name must not be empty"));
        }
        if self.queue.contains(':') {
            return Err(FlowError::config(format!("queue name `{}` contains ':'", self.queue)));
        }
        if self.concurrency == 0 {
            return Err(FlowError::config("concurrency must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(FlowError::config("max attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn keys(&self) -> QueueKeys {
        QueueKeys::new(&self.prefix, &self.queue)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> FlowResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| FlowError::config(format!("{name}={raw}: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.keys().prefix(), "flowq:default:");
    }

    #[test]
    fn variables_override_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("FLOWQ_PREFIX", "bull"),
            ("FLOWQ_QUEUE", "emails"),
            ("FLOWQ_CONCURRENCY", "4"),
            ("FLOWQ_POLL_MS", "250"),
            ("FLOWQ_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.keys().wait(), "bull:emails:wait");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn bad_numbers_are_config_errors() {
        let err = QueueConfig::from_lookup(lookup(&[("FLOWQ_CONCURRENCY", "many")])).unwrap_err();
        assert!(matches!(err, FlowError::Config(msg) if msg.contains("FLOWQ_CONCURRENCY")));

        let err = QueueConfig::from_lookup(lookup(&[("FLOWQ_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn queue_names_cannot_contain_separator() {
        let err = QueueConfig::from_lookup(lookup(&[("FLOWQ_QUEUE", "a:b")])).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
