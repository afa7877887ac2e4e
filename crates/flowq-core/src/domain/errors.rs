//! Errors - エラー型
//!
//! 依存解決のコアは失敗しません（端のケースはすべて no-op）。
//! エラーになるのは周辺の遷移（ジョブが期待した状態にない）、
//! flow の構築、設定の読み込みだけです。

use thiserror::Error;

use super::state::JobState;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("parent job not found: {0}")]
    ParentNotFound(String),

    #[error("invalid job id '{0}': ids must be non-empty and may not contain ':'")]
    InvalidJobId(String),

    #[error("invalid flow: {0}")]
    InvalidFlow(String),

    #[error("job {job_id} is {actual}, expected {expected}")]
    UnexpectedState {
        job_id: String,
        expected: JobState,
        actual: JobState,
    },

    #[error("job {0} is active and cannot be removed")]
    JobLocked(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("processor error: {0}")]
    Processor(String),
}

impl FlowError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unexpected_state(job_id: impl Into<String>, expected: JobState, actual: JobState) -> Self {
        Self::UnexpectedState {
            job_id: job_id.into(),
            expected,
            actual,
        }
    }
}
