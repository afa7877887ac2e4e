//! JobReporter port - 実行中ジョブからの進捗・ログ報告

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::FlowResult;

/// Sink for progress and log updates of a running job.
///
/// The queue implements this directly; the sandbox child implements it by
/// sending protocol messages to its supervisor.
#[async_trait]
pub trait JobReporter: Send + Sync {
    async fn progress(&self, job_id: &str, value: Value) -> FlowResult<()>;
    async fn log(&self, job_id: &str, entry: String) -> FlowResult<()>;
}
