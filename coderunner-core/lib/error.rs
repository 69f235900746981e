//! Error types for the coderunner orchestrator.

use std::time::Duration;

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an orchestrator operation.
pub type CoderunnerResult<T> = Result<T, CoderunnerError>;

/// The kinds of failure the orchestrator recognizes and surfaces distinctly.
///
/// Failures inside the sandboxed process itself (compile errors, runtime
/// errors) are not orchestrator errors: they surface as stderr bytes and a
/// nonzero exit code in a successful orchestration. Cleanup failures are
/// logged and never surfaced.
#[derive(Debug, Error)]
pub enum CoderunnerError {
    /// The requested language tag is not in the registry.
    #[error("unsupported language: {0}")]
    UnknownLanguage(String),

    /// A request field failed validation before admission.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A request payload exceeded its size limit.
    #[error("{field} exceeds the limit of {limit} code points")]
    PayloadTooLarge {
        /// The offending request field.
        field: &'static str,

        /// The limit the field exceeded, in Unicode code points.
        limit: usize,
    },

    /// The orchestrator configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The per-request image build failed before the sandbox ran.
    #[error("image build failed: {0}")]
    BuildFailed(String),

    /// The sandbox could not be created, attached to, or started.
    #[error("sandbox start failed: {0}")]
    SandboxStartFailed(String),

    /// The multiplexed stream ended inside a frame header or payload.
    #[error("truncated frame in multiplexed stream: {0}")]
    TruncatedFrame(String),

    /// The execution deadline expired before the sandbox exited.
    #[error("execution exceeded its deadline of {} seconds", .0.as_secs())]
    DeadlineExceeded(Duration),

    /// The caller went away while the execution was running.
    #[error("execution cancelled by the caller")]
    Cancelled,

    /// The admission queue is no longer accepting work.
    #[error("admission queue unavailable")]
    QueueClosed,

    /// An error reported by the container engine client.
    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    /// An I/O error touching a work directory or stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
