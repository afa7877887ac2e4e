//! Child side of the sandbox: runs one job at a time for a supervisor.
//!
//! State machine:
//! - `Idle` --Start--> `Started` --Completed/Failed--> `Idle`
//! - any --terminate/Stop--> `Terminating` (in-flight job finishes first)
//! - `Init` with an unknown processor, or a panicking processor --> `Errored`

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::message::{ChildMessage, JobPayload, ParentMessage, SerializedError, decode_line, encode_line};
use crate::domain::FlowResult;
use crate::ports::JobReporter;
use crate::typed::{DynProcessor, JobContext, ProcessorError, ProcessorRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Idle,
    Started,
    Terminating,
    Errored,
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChildStatus::Idle => "idle",
            ChildStatus::Started => "started",
            ChildStatus::Terminating => "terminating",
            ChildStatus::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Why the child loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Termination was requested and no job was left running.
    Terminated,
    /// A processor panicked.
    Crashed,
    /// The supervisor closed the channel.
    Disconnected,
}

type Running = JoinHandle<Result<Value, ProcessorError>>;

pub struct ChildProcessor {
    registry: ProcessorRegistry,
    processor: Option<Arc<dyn DynProcessor>>,
    status: ChildStatus,
}

impl ChildProcessor {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self {
            registry,
            processor: None,
            status: ChildStatus::Idle,
        }
    }

    pub fn status(&self) -> ChildStatus {
        self.status
    }

    /// Serve the supervisor until terminated, crashed or disconnected.
    pub async fn run<R, W>(mut self, reader: R, writer: W, mut terminate: watch::Receiver<bool>) -> ChildExit
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, outgoing) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_messages(writer, outgoing));
        let mut lines = reader.lines();
        let mut current: Option<Running> = None;
        let mut input_closed = false;

        if *terminate.borrow_and_update() {
            self.status = ChildStatus::Terminating;
        }

        let exit = loop {
            if current.is_none() {
                if self.status == ChildStatus::Terminating {
                    break ChildExit::Terminated;
                }
                if input_closed {
                    break ChildExit::Disconnected;
                }
            }

            tokio::select! {
                changed = terminate.changed(), if self.status != ChildStatus::Terminating => {
                    if changed.is_err() || *terminate.borrow() {
                        self.begin_termination("terminate signal");
                    }
                }
                joined = join_running(&mut current), if current.is_some() => {
                    current = None;
                    if let Some(exit) = self.finish_job(joined, &outbox) {
                        break exit;
                    }
                }
                line = lines.next_line(), if !input_closed => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_line::<ParentMessage>(&line) {
                        Ok(message) => self.handle(message, &mut current, &outbox),
                        Err(err) => {
                            warn!(error = %err, "undecodable message from supervisor");
                            send(&outbox, ChildMessage::Error {
                                err: SerializedError::new("ProtocolError", err.to_string()),
                            });
                        }
                    },
                    Ok(None) => {
                        debug!("supervisor closed the channel");
                        input_closed = true;
                    }
                    Err(err) => {
                        warn!(error = %err, "reading from supervisor failed");
                        input_closed = true;
                    }
                },
            }
        };

        drop(outbox);
        match writer_task.await {
            Ok(Err(err)) => warn!(error = %err, "writing to supervisor failed"),
            Err(err) => warn!(error = %err, "child writer task failed"),
            Ok(Ok(())) => {}
        }
        info!(?exit, status = %self.status, "child exited");
        exit
    }

    fn handle(
        &mut self,
        message: ParentMessage,
        current: &mut Option<Running>,
        outbox: &mpsc::UnboundedSender<ChildMessage>,
    ) {
        debug!(%message, status = %self.status, "supervisor message");
        match message {
            ParentMessage::Init { processor } => self.init(&processor, outbox),
            ParentMessage::Start { job } => self.start(job, current, outbox),
            ParentMessage::Stop => self.begin_termination("stop message"),
        }
    }

    fn init(&mut self, name: &str, outbox: &mpsc::UnboundedSender<ChildMessage>) {
        if self.status != ChildStatus::Idle {
            reject(outbox, format!("cannot init `{name}` while {}", self.status));
            return;
        }
        match self.registry.get(name) {
            Some(processor) => {
                self.processor = Some(processor);
                send(outbox, ChildMessage::InitCompleted);
            }
            None => {
                warn!(processor = name, "unknown processor");
                self.status = ChildStatus::Errored;
                send(outbox, ChildMessage::InitFailed {
                    err: SerializedError::new("MissingProcessor", format!("no processor registered as `{name}`")),
                });
            }
        }
    }

    fn start(&mut self, job: JobPayload, current: &mut Option<Running>, outbox: &mpsc::UnboundedSender<ChildMessage>) {
        if self.status != ChildStatus::Idle {
            warn!(job = %job.id, status = %self.status, "start rejected");
            reject(outbox, format!("cannot start job {} while {}", job.id, self.status));
            return;
        }
        let Some(processor) = self.processor.clone() else {
            reject(outbox, format!("cannot start job {} before init", job.id));
            return;
        };

        self.status = ChildStatus::Started;
        let reporter: Arc<dyn JobReporter> = Arc::new(ChannelReporter(outbox.clone()));
        let ctx = JobContext::new(job.id.clone(), job.name, job.attempts_made, reporter);
        debug!(job = %job.id, "job started");
        *current = Some(tokio::spawn(async move { processor.process(job.data, ctx).await }));
    }

    fn begin_termination(&mut self, reason: &str) {
        if self.status != ChildStatus::Terminating {
            debug!(reason, status = %self.status, "terminating");
            self.status = ChildStatus::Terminating;
        }
    }

    /// Report the outcome of the job; `Some` when the loop must end.
    fn finish_job(
        &mut self,
        joined: Result<Result<Value, ProcessorError>, JoinError>,
        outbox: &mpsc::UnboundedSender<ChildMessage>,
    ) -> Option<ChildExit> {
        let settle = |status: &mut ChildStatus| {
            if *status == ChildStatus::Started {
                *status = ChildStatus::Idle;
            }
        };
        match joined {
            Ok(Ok(value)) => {
                settle(&mut self.status);
                send(outbox, ChildMessage::Completed { value });
                None
            }
            Ok(Err(err)) => {
                settle(&mut self.status);
                send(outbox, ChildMessage::Failed {
                    err: SerializedError::from_processor(&err),
                });
                None
            }
            Err(err) => {
                let err = if err.is_panic() {
                    SerializedError::from_panic(err.into_panic())
                } else {
                    SerializedError::new("Cancelled", "processor task was cancelled")
                };
                warn!(error = %err, "processor crashed");
                self.status = ChildStatus::Errored;
                send(outbox, ChildMessage::Failed { err });
                Some(ChildExit::Crashed)
            }
        }
    }
}

async fn join_running(current: &mut Option<Running>) -> Result<Result<Value, ProcessorError>, JoinError> {
    match current {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn send(outbox: &mpsc::UnboundedSender<ChildMessage>, message: ChildMessage) {
    // The writer only stops once every sender is gone.
    let _ = outbox.send(message);
}

fn reject(outbox: &mpsc::UnboundedSender<ChildMessage>, message: String) {
    send(outbox, ChildMessage::Error {
        err: SerializedError::new("Rejected", message),
    });
}

async fn write_messages<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<ChildMessage>) -> FlowResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outgoing.recv().await {
        let line = encode_line(&message)?;
        writer.write_all(line.as_bytes()).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;
    }
    writer.shutdown().await.map_err(io_error)
}

fn io_error(err: std::io::Error) -> crate::domain::FlowError {
    crate::domain::FlowError::Processor(format!("sandbox channel: {err}"))
}

/// Progress and log lines of the running job, sent to the supervisor.
struct ChannelReporter(mpsc::UnboundedSender<ChildMessage>);

#[async_trait]
impl JobReporter for ChannelReporter {
    async fn progress(&self, _job_id: &str, value: Value) -> FlowResult<()> {
        send(&self.0, ChildMessage::Progress { value });
        Ok(())
    }

    async fn log(&self, _job_id: &str, entry: String) -> FlowResult<()> {
        send(&self.0, ChildMessage::Log { entry });
        Ok(())
    }
}
