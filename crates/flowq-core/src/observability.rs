//! Observability: per-state counts and the tracing subscriber.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::{LogConfig, LogFormat};
use crate::domain::{FlowError, FlowResult};

/// Number of jobs in each state container of one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub paused: usize,
    pub waiting_children: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting
            + self.active
            + self.delayed
            + self.paused
            + self.waiting_children
            + self.completed
            + self.failed
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `config.level` when set.
///
/// Fails if a subscriber is already installed or the filter does not parse.
pub fn init_tracing(config: &LogConfig) -> FlowResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| FlowError::config(format!("log level `{}`: {e}", config.level)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    installed.map_err(|e| FlowError::config(format!("failed to init tracing subscriber: {e}")))
}
