//! Handler trait - Task を実行する processor の定義
//!
//! # 二層構造
//! - `Handler<T>`: Task ごとの型付き handler
//! - `DynProcessor`: object-safe, JSON を受けて JSON を返す
//! - `TypedProcessor<T, H>`: 前者を後者に型消去する

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use super::context::JobContext;
use super::task::Task;
use crate::domain::FlowError;

/// Why a processor did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("invalid data for `{name}`: {source}")]
    InvalidData {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unserializable return value: {0}")]
    InvalidOutput(#[source] serde_json::Error),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Report(#[from] FlowError),
}

impl ProcessorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Short name used when the error crosses a process boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorError::InvalidData { .. } => "InvalidData",
            ProcessorError::InvalidOutput(_) => "InvalidOutput",
            ProcessorError::Failed(_) => "Error",
            ProcessorError::Report(_) => "ReportError",
        }
    }
}

#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: JobContext) -> Result<T::Output, ProcessorError>;
}

/// Object-safe processor, stored in the registry.
#[async_trait]
pub trait DynProcessor: Send + Sync {
    async fn process(&self, data: Value, ctx: JobContext) -> Result<Value, ProcessorError>;
    fn name(&self) -> &str;
}

pub struct TypedProcessor<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedProcessor<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynProcessor for TypedProcessor<T, H> {
    async fn process(&self, data: Value, ctx: JobContext) -> Result<Value, ProcessorError> {
        let task: T = serde_json::from_value(data).map_err(|source| ProcessorError::InvalidData {
            name: T::NAME.to_string(),
            source,
        })?;
        let output = self.handler.handle(task, ctx).await?;
        serde_json::to_value(output).map_err(ProcessorError::InvalidOutput)
    }

    fn name(&self) -> &str {
        T::NAME
    }
}

/// Closure-backed handler, for processors that need no state.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<T, F, Fut> Handler<T> for FnHandler<F>
where
    T: Task,
    F: Fn(T, JobContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<T::Output, ProcessorError>> + Send,
{
    async fn handle(&self, task: T, ctx: JobContext) -> Result<T::Output, ProcessorError> {
        (self.0)(task, ctx).await
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{Sum, SumHandler};
    use super::*;
    use crate::domain::{FlowResult, JobKey, JobOptions, JobRecord};
    use crate::ports::JobReporter;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Value>>);

    #[async_trait]
    impl JobReporter for Recorder {
        async fn progress(&self, _job_id: &str, value: Value) -> FlowResult<()> {
            self.0.lock().unwrap().push(value);
            Ok(())
        }

        async fn log(&self, _job_id: &str, _entry: String) -> FlowResult<()> {
            Ok(())
        }
    }

    fn ctx(reporter: Arc<Recorder>) -> JobContext {
        let job = JobRecord::new(JobKey::new("flowq:q:", "1"), Sum::NAME, json!({}), JobOptions::default(), 0);
        JobContext::for_job(&job, reporter)
    }

    #[tokio::test]
    async fn typed_processor_decodes_and_encodes() {
        let recorder = Arc::new(Recorder::default());
        let processor = TypedProcessor::<Sum, _>::new(SumHandler);

        let value = processor
            .process(json!({"values": [1, 2, 3]}), ctx(recorder.clone()))
            .await
            .unwrap();

        assert_eq!(value, json!(6));
        assert_eq!(processor.name(), "math.sum");
        assert_eq!(*recorder.0.lock().unwrap(), vec![json!(100)]);
    }

    #[tokio::test]
    async fn bad_data_is_reported_with_the_task_name() {
        let processor = TypedProcessor::<Sum, _>::new(SumHandler);

        let err = processor
            .process(json!({"values": "nope"}), ctx(Arc::new(Recorder::default())))
            .await
            .unwrap_err();

        assert!(matches!(&err, ProcessorError::InvalidData { name, .. } if name == "math.sum"));
        assert_eq!(err.kind(), "InvalidData");
    }

    #[tokio::test]
    async fn closures_can_be_handlers() {
        let processor = TypedProcessor::<Sum, _>::new(FnHandler(|task: Sum, _ctx: JobContext| async move {
            Ok::<_, ProcessorError>(task.values.len() as i64)
        }));

        let value = processor
            .process(json!({"values": [5, 5]}), ctx(Arc::new(Recorder::default())))
            .await
            .unwrap();
        assert_eq!(value, json!(2));
    }
}
