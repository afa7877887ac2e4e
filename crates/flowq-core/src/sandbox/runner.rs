//! Supervisor side: one child per job over an in-memory duplex channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::child::{ChildExit, ChildProcessor};
use super::message::{ChildMessage, JobPayload, ParentMessage, SerializedError, decode_line, encode_line};
use crate::domain::JobRecord;
use crate::ports::JobReporter;
use crate::typed::ProcessorRegistry;
use crate::worker::JobRunner;

const CHANNEL_CAPACITY: usize = 64 * 1024;

/// Runs every job in a fresh [`ChildProcessor`].
///
/// The child only sees serialized messages, never the job record or the
/// queue. `terminate()` reaches every live child; each one finishes its
/// current job and exits.
pub struct SandboxRunner {
    registry: ProcessorRegistry,
    terminate: watch::Sender<bool>,
}

impl SandboxRunner {
    pub fn new(registry: ProcessorRegistry) -> Self {
        let (terminate, _) = watch::channel(false);
        Self { registry, terminate }
    }

    pub fn terminate(&self) {
        self.terminate.send_replace(true);
    }
}

#[async_trait]
impl JobRunner for SandboxRunner {
    async fn run(&self, job: &JobRecord, reporter: Arc<dyn JobReporter>) -> Result<Value, SerializedError> {
        let (parent_io, child_io) = tokio::io::duplex(CHANNEL_CAPACITY);
        let (child_read, child_write) = tokio::io::split(child_io);
        let child = ChildProcessor::new(self.registry.clone());
        let handle = tokio::spawn(child.run(BufReader::new(child_read), child_write, self.terminate.subscribe()));

        let (parent_read, mut to_child) = tokio::io::split(parent_io);
        let mut from_child = BufReader::new(parent_read).lines();

        // A child that is already gone shows up as end of input below.
        if let Err(err) = send(&mut to_child, &ParentMessage::Init { processor: job.name.clone() }).await {
            debug!(job = job.id(), error = %err, "init not delivered");
        }
        let outcome = loop {
            let line = match from_child.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Err(SerializedError::new("ChildExited", "child closed the channel before reporting")),
                Err(err) => break Err(SerializedError::from_error("ChannelError", &err)),
            };
            let message = match decode_line::<ChildMessage>(&line) {
                Ok(message) => message,
                Err(err) => {
                    warn!(job = job.id(), error = %err, "undecodable message from child");
                    continue;
                }
            };
            match message {
                ChildMessage::InitCompleted => {
                    if let Err(err) = send(&mut to_child, &ParentMessage::Start { job: JobPayload::from(job) }).await {
                        debug!(job = job.id(), error = %err, "start not delivered");
                    }
                }
                ChildMessage::Progress { value } => {
                    if let Err(err) = reporter.progress(job.id(), value).await {
                        warn!(job = job.id(), error = %err, "progress update failed");
                    }
                }
                ChildMessage::Log { entry } => {
                    if let Err(err) = reporter.log(job.id(), entry).await {
                        warn!(job = job.id(), error = %err, "log append failed");
                    }
                }
                ChildMessage::Completed { value } => break Ok(value),
                ChildMessage::InitFailed { err } | ChildMessage::Failed { err } | ChildMessage::Error { err } => {
                    break Err(err);
                }
            }
        };

        // A crashed child has stopped reading; a failed stop is expected then.
        let _ = send(&mut to_child, &ParentMessage::Stop).await;
        let _ = to_child.shutdown().await;
        match handle.await {
            Ok(ChildExit::Crashed) => warn!(job = job.id(), "child crashed"),
            Ok(exit) => debug!(job = job.id(), ?exit, "child finished"),
            Err(err) => warn!(job = job.id(), error = %err, "child task failed"),
        }
        outcome
    }
}

async fn send<W>(writer: &mut W, message: &ParentMessage) -> Result<(), SerializedError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(message).map_err(|err| SerializedError::from_error("ProtocolError", &err))?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|err| SerializedError::from_error("ChannelError", &err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FlowResult, JobKey, JobOptions};
    use crate::typed::handler::fixtures::{Explode, ExplodeHandler, Sum, SumHandler};
    use crate::typed::Task;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl JobReporter for Recorder {
        async fn progress(&self, _job_id: &str, value: Value) -> FlowResult<()> {
            self.progress.lock().unwrap().push(value);
            Ok(())
        }

        async fn log(&self, _job_id: &str, _entry: String) -> FlowResult<()> {
            Ok(())
        }
    }

    fn runner() -> SandboxRunner {
        let mut registry = ProcessorRegistry::new();
        registry.register::<Sum, _>(SumHandler).unwrap();
        registry.register::<Explode, _>(ExplodeHandler).unwrap();
        SandboxRunner::new(registry)
    }

    fn job(name: &str, data: Value) -> JobRecord {
        JobRecord::new(JobKey::new("flowq:q:", "1"), name, data, JobOptions::default(), 0)
    }

    #[tokio::test]
    async fn completed_value_and_progress_come_back() {
        let recorder = Arc::new(Recorder::default());

        let value = runner()
            .run(&job(Sum::NAME, json!({"values": [2, 3]})), recorder.clone())
            .await
            .unwrap();

        assert_eq!(value, json!(5));
        assert_eq!(*recorder.progress.lock().unwrap(), vec![json!(100)]);
    }

    #[tokio::test]
    async fn processor_failure_is_the_job_error() {
        let err = runner()
            .run(&job(Explode::NAME, json!(null)), Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert_eq!(err.message, "kaboom");
    }

    #[tokio::test]
    async fn unknown_processor_fails_at_init() {
        let err = runner()
            .run(&job("missing", json!(null)), Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert_eq!(err.name, "MissingProcessor");
    }

    #[tokio::test]
    async fn terminated_runner_does_not_start_jobs() {
        let runner = runner();
        runner.terminate();

        let err = runner
            .run(&job(Sum::NAME, json!({"values": []})), Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert_eq!(err.name, "ChildExited");
    }
}
