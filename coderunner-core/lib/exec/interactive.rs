//! Interactive sessions: streaming output and id-filtered stdin injection.
//!
//! An interactive execution skips the per-request image build — startup
//! latency matters — and instead writes its source into a per-execution
//! directory on the shared work volume, mounted read-write into the sandbox.
//! Output frames stream to the caller as they arrive; input messages are
//! accepted only when they carry the execution's own id, so stale writes
//! from a prior run on a reused channel are silently discarded.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::exec::{Execution, ExecutionState, ExecutionStatus, Resource, ResourceLedger};
use crate::registry::LanguageSpec;
use crate::sandbox::{
    frame_from_log, AttachedStream, ContainerOpts, ExitStatus, SandboxDriver, StreamKind,
};
use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Events delivered to the interactive caller, in emission order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The execution was admitted and is about to start; precedes every
    /// output event.
    Started {
        /// The execution's unique id.
        execution_id: Uuid,
    },

    /// A chunk of program output, or an orchestrator notice on stderr.
    Output {
        /// Lossy UTF-8 text of one frame.
        data: String,

        /// The stream the frame belongs to.
        kind: StreamKind,
    },

    /// An orchestrator-side failure outside the sandboxed process.
    Error {
        /// Human-readable description.
        message: String,
    },

    /// Terminal event; emitted exactly once per execution, error paths
    /// included.
    Completed {
        /// The execution's unique id.
        execution_id: Uuid,

        /// Outcome classification.
        status: ExecutionStatus,

        /// Sandbox exit code; `-1` when the sandbox never ran.
        exit_code: i64,
    },
}

/// One stdin message from the caller's channel.
#[derive(Debug, Clone)]
pub struct InputMessage {
    /// The execution id the caller addressed, in string form.
    pub execution_id: String,

    /// The text to deliver; one `\n` is appended on delivery.
    pub data: String,
}

/// Handle returned to the adapter when a session is admitted.
#[derive(Debug)]
pub struct SessionHandle {
    execution_id: Uuid,
    input_tx: mpsc::UnboundedSender<InputMessage>,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl SessionHandle {
    pub(crate) fn new(execution_id: Uuid, input_tx: mpsc::UnboundedSender<InputMessage>) -> Self {
        Self {
            execution_id,
            input_tx,
        }
    }

    /// The id the caller must address input messages to.
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Forward an input message to the session. Routing by id happens inside
    /// the session; messages for other executions are dropped there.
    pub fn send_input(&self, message: InputMessage) {
        let _ = self.input_tx.send(message);
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Run one interactive session to completion, cleanup included.
pub(crate) async fn run(
    driver: SandboxDriver,
    config: Arc<OrchestratorConfig>,
    spec: LanguageSpec,
    source: String,
    mut execution: Execution,
    events: mpsc::Sender<SessionEvent>,
    input_rx: mpsc::UnboundedReceiver<InputMessage>,
) {
    let execution_id = *execution.get_id();
    let mut ledger = ResourceLedger::new();

    let outcome = drive(
        &driver,
        &config,
        &spec,
        &source,
        &mut execution,
        &mut ledger,
        &events,
        input_rx,
    )
    .await;

    match outcome {
        Ok(exit) => {
            let _ = events
                .send(SessionEvent::Completed {
                    execution_id,
                    status: ExecutionStatus::from_exit_code(exit.code),
                    exit_code: exit.code,
                })
                .await;
        }
        // The caller is gone: no further messages.
        Err(CoderunnerError::Cancelled) => {}
        Err(error) => {
            let _ = events
                .send(SessionEvent::Error {
                    message: error.to_string(),
                })
                .await;
            let _ = events
                .send(SessionEvent::Completed {
                    execution_id,
                    status: ExecutionStatus::Error,
                    exit_code: -1,
                })
                .await;
        }
    }

    execution.transition(ExecutionState::Cleanup);
    ledger.release_all(&driver).await;
    execution.transition(ExecutionState::Done);
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    driver: &SandboxDriver,
    config: &OrchestratorConfig,
    spec: &LanguageSpec,
    source: &str,
    execution: &mut Execution,
    ledger: &mut ResourceLedger,
    events: &mpsc::Sender<SessionEvent>,
    mut input_rx: mpsc::UnboundedReceiver<InputMessage>,
) -> CoderunnerResult<ExitStatus> {
    let execution_id = *execution.get_id();
    let deadline = *execution.get_deadline();
    let work_dir = execution.get_work_dir().clone();

    execution.transition(ExecutionState::Preparing);
    tokio::fs::create_dir_all(&work_dir).await?;
    ledger.push(Resource::WorkDir(work_dir.clone()));
    tokio::fs::write(work_dir.join(spec.get_source_filename()), source).await?;

    deliver(events, SessionEvent::Started { execution_id }).await?;
    deliver(
        events,
        SessionEvent::Output {
            data: "Starting execution\n".to_string(),
            kind: StreamKind::Stderr,
        },
    )
    .await?;

    execution.transition(ExecutionState::Starting);
    let container_name = format!("coderunner-{}", execution_id);
    let opts = ContainerOpts {
        memory_limit: spec.get_memory_class().limit_bytes(),
        open_stdin: true,
        attach_stdin: true,
        working_dir: Some(format!(
            "{}/{}",
            config.get_container_workspace(),
            execution_id
        )),
        binds: Some(vec![format!(
            "{}:{}",
            config.get_workspace_dir().display(),
            config.get_container_workspace()
        )]),
    };
    let container_id = driver
        .create_container(&container_name, spec.get_image(), spec.command(), &opts)
        .await?;
    ledger.push(Resource::Container(container_id.clone()));

    let AttachedStream {
        mut output,
        mut input,
    } = driver.attach(&container_id).await?;
    driver.start(&container_id).await?;

    execution.transition(ExecutionState::Running);
    let wanted_id = execution_id.to_string();
    let sleep = tokio::time::sleep(deadline);
    tokio::pin!(sleep);
    let wait = driver.wait(&container_id);
    tokio::pin!(wait);

    let mut stdin_open = true;
    let mut output_open = true;
    let mut inputs_live = true;
    let mut timed_out = false;

    let exit = loop {
        tokio::select! {
            exit = &mut wait => {
                break match exit {
                    Ok(status) => status,
                    Err(_) if timed_out => ExitStatus { code: 137 },
                    Err(error) => return Err(error),
                };
            }
            frame = output.next(), if output_open => match frame {
                Some(Ok(log)) => {
                    if let Some(frame) = frame_from_log(log) {
                        deliver(
                            events,
                            SessionEvent::Output {
                                data: frame.text(),
                                kind: frame.kind,
                            },
                        )
                        .await?;
                    }
                }
                Some(Err(error)) => {
                    // A broken stream is treated as end-of-stream.
                    tracing::warn!("output stream for {} ended early: {}", container_id, error);
                    output_open = false;
                    close_stdin(&mut input, &mut stdin_open).await;
                }
                None => {
                    output_open = false;
                    close_stdin(&mut input, &mut stdin_open).await;
                }
            },
            message = input_rx.recv(), if inputs_live => match message {
                Some(message) if stdin_open && accepts_input(&wanted_id, &message) => {
                    let mut line = message.data;
                    line.push('\n');
                    if let Err(error) = input.write_all(line.as_bytes()).await {
                        tracing::warn!("stdin write to {} failed: {}", container_id, error);
                    } else {
                        let _ = input.flush().await;
                    }
                }
                Some(_) => {}
                None => inputs_live = false,
            },
            _ = &mut sleep, if !timed_out => {
                timed_out = true;
                deliver(
                    events,
                    SessionEvent::Output {
                        data: super::batch::timeout_notice(deadline),
                        kind: StreamKind::Stderr,
                    },
                )
                .await?;
                execution.transition(ExecutionState::Stopping);
                driver.stop(&container_id, *config.get_stop_grace()).await;
            }
            _ = events.closed() => {
                // Caller disconnect behaves as deadline expiry, minus the
                // stderr notice: the channel is already gone.
                execution.transition(ExecutionState::Stopping);
                driver.stop(&container_id, *config.get_stop_grace()).await;
                return Err(CoderunnerError::Cancelled);
            }
        }
    };

    execution.transition(ExecutionState::Draining);
    while output_open {
        match tokio::time::timeout(Duration::from_millis(500), output.next()).await {
            Ok(Some(Ok(log))) => {
                if let Some(frame) = frame_from_log(log) {
                    deliver(
                        events,
                        SessionEvent::Output {
                            data: frame.text(),
                            kind: frame.kind,
                        },
                    )
                    .await?;
                }
            }
            Ok(Some(Err(_))) | Ok(None) | Err(_) => output_open = false,
        }
    }

    execution.record_exit(exit.code);
    Ok(exit)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Whether an input message is addressed to this execution.
fn accepts_input(wanted_id: &str, message: &InputMessage) -> bool {
    message.execution_id == wanted_id
}

/// Deliver an event to the caller; a closed channel means the caller went
/// away, which cancels the execution.
async fn deliver(
    events: &mpsc::Sender<SessionEvent>,
    event: SessionEvent,
) -> CoderunnerResult<()> {
    events
        .send(event)
        .await
        .map_err(|_| CoderunnerError::Cancelled)
}

async fn close_stdin(input: &mut Pin<Box<dyn AsyncWrite + Send>>, open: &mut bool) {
    if *open {
        if let Err(error) = input.shutdown().await {
            tracing::debug!("closing sandbox stdin: {}", error);
        }
        *open = false;
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_is_accepted_only_for_the_matching_id() {
        let id = Uuid::new_v4().to_string();
        let matching = InputMessage {
            execution_id: id.clone(),
            data: "x".to_string(),
        };
        let stale = InputMessage {
            execution_id: Uuid::new_v4().to_string(),
            data: "z".to_string(),
        };
        let bogus = InputMessage {
            execution_id: "bogus".to_string(),
            data: "z".to_string(),
        };

        assert!(accepts_input(&id, &matching));
        assert!(!accepts_input(&id, &stale));
        assert!(!accepts_input(&id, &bogus));
    }

    #[tokio::test]
    async fn the_session_handle_forwards_input_messages() {
        let id = Uuid::new_v4();
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(id, input_tx);

        handle.send_input(InputMessage {
            execution_id: id.to_string(),
            data: "hello".to_string(),
        });

        let message = input_rx.recv().await.unwrap();
        assert_eq!(message.execution_id, id.to_string());
        assert_eq!(message.data, "hello");
        assert_eq!(handle.execution_id(), id);
    }

    #[tokio::test]
    async fn a_dropped_caller_cancels_delivery() {
        let (events_tx, events_rx) = mpsc::channel(1);
        drop(events_rx);

        let result = deliver(
            &events_tx,
            SessionEvent::Output {
                data: "late".to_string(),
                kind: StreamKind::Stdout,
            },
        )
        .await;

        assert!(matches!(result, Err(CoderunnerError::Cancelled)));
    }
}
