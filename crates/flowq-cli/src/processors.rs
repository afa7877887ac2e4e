//! Processors used by the demo flows.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use flowq_core::typed::{Handler, JobContext, ProcessorError, ProcessorRegistry, RegistryError, Task};

/// One slice of a report: sums `1..=items`, one step at a time.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportPart {
    pub part: u32,
    pub items: u32,
}

impl Task for ReportPart {
    const NAME: &'static str = "report.part";
    type Output = u64;
}

/// Parent of every part; runs once all parts are done.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportMerge {
    pub parts: u32,
}

impl Task for ReportMerge {
    const NAME: &'static str = "report.merge";
    type Output = Value;
}

/// Fails its first `failures` calls, then works.
pub struct PartHandler {
    remaining_failures: AtomicU32,
    step: Duration,
}

impl PartHandler {
    pub fn new(failures: u32, step: Duration) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            step,
        }
    }
}

#[async_trait]
impl Handler<ReportPart> for PartHandler {
    async fn handle(&self, task: ReportPart, ctx: JobContext) -> Result<u64, ProcessorError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ProcessorError::failed(format!(
                "intentional failure in part {} (left={left})",
                task.part
            )));
        }

        let mut total = 0u64;
        for item in 1..=task.items {
            tokio::time::sleep(self.step).await;
            total += u64::from(item);
            ctx.progress(json!(item * 100 / task.items.max(1))).await?;
        }
        ctx.log(format!("part {} summed {} items", task.part, task.items)).await?;
        Ok(total)
    }
}

pub struct MergeHandler;

#[async_trait]
impl Handler<ReportMerge> for MergeHandler {
    async fn handle(&self, task: ReportMerge, ctx: JobContext) -> Result<Value, ProcessorError> {
        ctx.log(format!("merging {} parts", task.parts)).await?;
        Ok(json!({ "parts": task.parts, "attempt": ctx.attempts_made }))
    }
}

pub fn registry(failures: u32, step: Duration) -> Result<ProcessorRegistry, RegistryError> {
    let mut registry = ProcessorRegistry::new();
    registry.register::<ReportPart, _>(PartHandler::new(failures, step))?;
    registry.register::<ReportMerge, _>(MergeHandler)?;
    Ok(registry)
}
