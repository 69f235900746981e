//! One-shot batch execution.
//!
//! The batch path bakes the submitted source (and stdin, when the language's
//! detector finds a read) into an ephemeral per-request image, runs it under
//! the security profile, and collects the combined log blob after exit.
//! Baking sources into the image sidesteps cross-container filesystem
//! ownership problems on shared mounts; compiled languages build under the
//! writable `/tmp`, never `/code`.

use std::sync::Arc;
use std::time::Duration;

use getset::Getters;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::exec::{
    Execution, ExecutionMode, ExecutionState, ExecutionStatus, Resource, ResourceLedger,
};
use crate::orchestrator::ExecutionRequest;
use crate::registry::LanguageSpec;
use crate::sandbox::{Frame, SandboxDriver, INPUT_FILENAME};
use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Result of a completed batch execution.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct BatchOutcome {
    /// The execution's unique id.
    execution_id: Uuid,

    /// Success iff the sandboxed process exited with code 0.
    status: ExecutionStatus,

    /// Combined stdout and stderr in frame order.
    output: String,

    /// The sandbox exit code.
    exit_code: i64,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Run one batch execution to completion, cleanup included.
pub(crate) async fn run(
    driver: SandboxDriver,
    config: Arc<OrchestratorConfig>,
    spec: LanguageSpec,
    request: ExecutionRequest,
) -> CoderunnerResult<BatchOutcome> {
    let stdin_detected = request.get_stdin().is_some() && spec.reads_stdin(request.get_source());
    let deadline = if stdin_detected {
        *config.get_batch_stdin_deadline()
    } else {
        *config.get_batch_deadline()
    };

    let mut execution = Execution::new(ExecutionMode::Batch, config.get_workspace_dir(), deadline);
    let mut ledger = ResourceLedger::new();

    let result = drive(
        &driver,
        &config,
        &spec,
        &request,
        stdin_detected,
        &mut execution,
        &mut ledger,
    )
    .await;

    execution.transition(ExecutionState::Cleanup);
    ledger.release_all(&driver).await;
    execution.transition(ExecutionState::Done);

    let (output, exit_code) = result?;
    Ok(BatchOutcome {
        execution_id: *execution.get_id(),
        status: ExecutionStatus::from_exit_code(exit_code),
        output,
        exit_code,
    })
}

async fn drive(
    driver: &SandboxDriver,
    config: &OrchestratorConfig,
    spec: &LanguageSpec,
    request: &ExecutionRequest,
    stdin_detected: bool,
    execution: &mut Execution,
    ledger: &mut ResourceLedger,
) -> CoderunnerResult<(String, i64)> {
    let deadline = *execution.get_deadline();
    let work_dir = execution.get_work_dir().clone();

    execution.transition(ExecutionState::Preparing);
    tokio::fs::create_dir_all(&work_dir).await?;
    ledger.push(Resource::WorkDir(work_dir.clone()));
    tokio::fs::write(
        work_dir.join(spec.get_source_filename()),
        request.get_source(),
    )
    .await?;
    if stdin_detected {
        let input = request.get_stdin().as_deref().unwrap_or_default();
        tokio::fs::write(work_dir.join(INPUT_FILENAME), newline_terminated(input)).await?;
    }

    execution.transition(ExecutionState::Building);
    let image_tag = format!("coderunner-exec-{}", execution.get_id());
    driver
        .build_ephemeral_image(
            &work_dir,
            &image_tag,
            spec.get_image(),
            spec.get_source_filename(),
            stdin_detected,
        )
        .await?;
    ledger.push(Resource::EphemeralImage(image_tag.clone()));

    let command = if stdin_detected {
        spec.piped_command()
    } else {
        spec.command()
    };

    execution.transition(ExecutionState::Starting);
    let container_name = format!("coderunner-{}", execution.get_id());
    let opts = crate::sandbox::ContainerOpts {
        memory_limit: spec.get_memory_class().limit_bytes(),
        open_stdin: false,
        attach_stdin: false,
        working_dir: None,
        binds: None,
    };
    let container_id = driver
        .create_container(&container_name, &image_tag, command, &opts)
        .await?;
    ledger.push(Resource::Container(container_id.clone()));

    let _stream = driver.attach(&container_id).await?;
    driver.start(&container_id).await?;

    execution.transition(ExecutionState::Running);
    let mut timed_out = false;
    let exit = match tokio::time::timeout(deadline, driver.wait(&container_id)).await {
        Ok(exit) => exit?,
        Err(_) => {
            timed_out = true;
            execution.transition(ExecutionState::Stopping);
            driver.stop(&container_id, *config.get_stop_grace()).await;
            match driver.wait(&container_id).await {
                Ok(exit) => exit,
                Err(error) => {
                    tracing::warn!("wait after forced stop failed: {}", error);
                    return Err(CoderunnerError::DeadlineExceeded(deadline));
                }
            }
        }
    };

    execution.transition(ExecutionState::Draining);
    let frames = driver.bulk_logs(&container_id).await;
    let mut output: String = frames.iter().map(Frame::text).collect();
    if timed_out {
        output.push_str(&timeout_notice(deadline));
    }

    execution.record_exit(exit.code);
    Ok((output, exit.code))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn newline_terminated(input: &str) -> String {
    if input.ends_with('\n') {
        input.to_string()
    } else {
        format!("{}\n", input)
    }
}

pub(crate) fn timeout_notice(deadline: Duration) -> String {
    format!(
        "Execution timed out after {} seconds\n",
        deadline.as_secs()
    )
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_text_gains_exactly_one_trailing_newline() {
        assert_eq!(newline_terminated("abc"), "abc\n");
        assert_eq!(newline_terminated("abc\n"), "abc\n");
        assert_eq!(newline_terminated(""), "\n");
    }

    #[test]
    fn the_timeout_notice_names_the_deadline() {
        assert_eq!(
            timeout_notice(Duration::from_secs(10)),
            "Execution timed out after 10 seconds\n"
        );
    }
}
