//! Per-execution lifecycle state and the cleanup ledger.
//!
//! Every execution owns a unique 128-bit random id, walks the state machine
//! below, and records each resource it acquires in a [`ResourceLedger`]. The
//! ledger unwinds in reverse acquisition order during cleanup on every exit
//! path; each release is best-effort and failures are logged, never masking
//! the execution result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use getset::Getters;
use serde::Serialize;
use uuid::Uuid;

use crate::sandbox::SandboxDriver;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Delivery mode of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One-shot: output collected after exit and returned as a blob.
    Batch,

    /// Long-lived: output streamed incrementally, stdin injected by id.
    Interactive,
}

/// Lifecycle states of an execution.
///
/// The happy path is `Admitted → Preparing → [Building] → Starting →
/// Running → Draining → Cleanup → Done`; deadline expiry inserts `Stopping`
/// before `Draining`, and fatal errors jump straight to `Cleanup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Queued, waiting for a concurrency slot.
    Admitted,

    /// Allocating the work directory and writing sources.
    Preparing,

    /// Building the ephemeral image (batch only).
    Building,

    /// Creating the container, attaching the stream, starting.
    Starting,

    /// The sandboxed process is executing.
    Running,

    /// Deadline expired; the sandbox is being force-stopped.
    Stopping,

    /// The container exited; remaining stream bytes are being read.
    Draining,

    /// Releasing every acquired resource.
    Cleanup,

    /// Terminal state.
    Done,
}

/// Final outcome classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The sandboxed process exited with code 0.
    Success,

    /// The sandboxed process failed, timed out, or never started.
    Error,
}

/// Runtime record for one admitted execution.
#[derive(Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Execution {
    /// Unique identifier; the sole key for input routing and resource naming.
    id: Uuid,

    /// Delivery mode.
    mode: ExecutionMode,

    /// Current lifecycle state.
    state: ExecutionState,

    /// Filesystem directory owned exclusively by this execution.
    work_dir: PathBuf,

    /// Wall-clock budget before the sandbox is forcibly terminated.
    deadline: Duration,

    /// Exit code, set on normal termination.
    exit_code: Option<i64>,
}

/// One resource acquired by an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// The per-execution work directory on the host.
    WorkDir(PathBuf),

    /// A created container, by id.
    Container(String),

    /// A per-request image, by tag.
    EphemeralImage(String),
}

/// Stack of acquired resources, unwound in reverse order during cleanup.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    acquired: Vec<Resource>,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl ExecutionStatus {
    /// Classify an exit code: success iff zero.
    pub fn from_exit_code(code: i64) -> Self {
        if code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        }
    }
}

impl Execution {
    /// Admit a new execution, minting its id and work directory path.
    pub fn new(mode: ExecutionMode, workspace_dir: &Path, deadline: Duration) -> Self {
        let id = Uuid::new_v4();
        let work_dir = workspace_dir.join(id.to_string());

        Self {
            id,
            mode,
            state: ExecutionState::Admitted,
            work_dir,
            deadline,
            exit_code: None,
        }
    }

    /// Move to the next lifecycle state.
    pub fn transition(&mut self, next: ExecutionState) {
        tracing::debug!(
            "execution {}: {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        self.state = next;
    }

    /// Record the sandbox exit code.
    pub fn record_exit(&mut self, code: i64) {
        self.exit_code = Some(code);
    }
}

impl ResourceLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly acquired resource.
    pub fn push(&mut self, resource: Resource) {
        self.acquired.push(resource);
    }

    /// Number of resources still held.
    pub fn len(&self) -> usize {
        self.acquired.len()
    }

    /// Whether every resource has been released.
    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    /// Release everything in reverse acquisition order. Each step is
    /// best-effort: failures are logged and never interrupt the unwind.
    pub async fn release_all(&mut self, driver: &SandboxDriver) {
        while let Some(resource) = self.acquired.pop() {
            match resource {
                Resource::Container(id) => driver.remove_container(&id).await,
                Resource::EphemeralImage(tag) => driver.remove_image(&tag).await,
                Resource::WorkDir(path) => {
                    if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                        tracing::warn!(
                            "failed to remove work directory {}: {}",
                            path.display(),
                            e
                        );
                    }
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
