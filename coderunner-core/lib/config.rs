//! Configuration for the execution orchestrator.
//!
//! This module handles:
//! - The global admission cap
//! - Batch and interactive deadlines
//! - The shared work volume backing interactive executions
//!
//! Values load from environment variables with sensible defaults; the
//! deadline split between the batch and interactive modes is deliberate and
//! each value can be overridden independently.

use std::path::PathBuf;
use std::time::Duration;

use getset::Getters;

use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the admission cap.
pub const MAX_CONCURRENT_ENV_VAR: &str = "MAX_CONCURRENT_EXECUTIONS";

/// Environment variable for the host directory backing interactive work directories.
pub const WORKSPACE_DIR_ENV_VAR: &str = "WORKSPACE_DIR";

/// Environment variable for the plain batch deadline, in seconds.
pub const BATCH_TIMEOUT_ENV_VAR: &str = "BATCH_TIMEOUT_SECS";

/// Environment variable for the batch deadline when stdin is detected, in seconds.
pub const BATCH_STDIN_TIMEOUT_ENV_VAR: &str = "BATCH_STDIN_TIMEOUT_SECS";

/// Environment variable for the interactive deadline, in seconds.
pub const INTERACTIVE_TIMEOUT_ENV_VAR: &str = "INTERACTIVE_TIMEOUT_SECS";

/// Default number of executions allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default deadline for a batch execution.
pub const DEFAULT_BATCH_DEADLINE: Duration = Duration::from_secs(10);

/// Default deadline for a batch execution whose source reads stdin.
pub const DEFAULT_BATCH_STDIN_DEADLINE: Duration = Duration::from_secs(15);

/// Default deadline for an interactive execution.
pub const DEFAULT_INTERACTIVE_DEADLINE: Duration = Duration::from_secs(300);

/// Default host directory for per-execution work directories.
pub const DEFAULT_WORKSPACE_DIR: &str = "/tmp/coderunner-workspace";

/// Mount point of the shared work volume inside interactive sandboxes.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Grace period given to a sandbox between SIGTERM and SIGKILL on a forced stop.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Settings that shape admission, deadlines, and the shared work volume.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct OrchestratorConfig {
    /// Maximum number of executions in the building or running states.
    max_concurrent: usize,

    /// Deadline for a batch execution with no stdin.
    batch_deadline: Duration,

    /// Deadline for a batch execution whose source reads stdin.
    batch_stdin_deadline: Duration,

    /// Deadline for an interactive execution.
    interactive_deadline: Duration,

    /// Host directory holding one work directory per execution id.
    workspace_dir: PathBuf,

    /// Mount point of the shared work volume inside the sandbox.
    container_workspace: String,

    /// Grace period for forced stops.
    stop_grace: Duration,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl OrchestratorConfig {
    /// Create a configuration with the given cap and work volume, default deadlines.
    pub fn new(max_concurrent: usize, workspace_dir: PathBuf) -> CoderunnerResult<Self> {
        if max_concurrent == 0 {
            return Err(CoderunnerError::Config(
                "MAX_CONCURRENT_EXECUTIONS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            max_concurrent,
            batch_deadline: DEFAULT_BATCH_DEADLINE,
            batch_stdin_deadline: DEFAULT_BATCH_STDIN_DEADLINE,
            interactive_deadline: DEFAULT_INTERACTIVE_DEADLINE,
            workspace_dir,
            container_workspace: CONTAINER_WORKSPACE.to_string(),
            stop_grace: STOP_GRACE,
        })
    }

    /// Load the configuration from environment variables, falling back to defaults.
    pub fn from_env() -> CoderunnerResult<Self> {
        let max_concurrent = match std::env::var(MAX_CONCURRENT_ENV_VAR) {
            Ok(value) => value.parse::<usize>().map_err(|_| {
                CoderunnerError::Config(format!(
                    "{} must be an integer, got {:?}",
                    MAX_CONCURRENT_ENV_VAR, value
                ))
            })?,
            Err(_) => DEFAULT_MAX_CONCURRENT,
        };

        let workspace_dir = std::env::var(WORKSPACE_DIR_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORKSPACE_DIR));

        let mut config = Self::new(max_concurrent, workspace_dir)?;
        if let Some(deadline) = deadline_from_env(BATCH_TIMEOUT_ENV_VAR)? {
            config.batch_deadline = deadline;
        }
        if let Some(deadline) = deadline_from_env(BATCH_STDIN_TIMEOUT_ENV_VAR)? {
            config.batch_stdin_deadline = deadline;
        }
        if let Some(deadline) = deadline_from_env(INTERACTIVE_TIMEOUT_ENV_VAR)? {
            config.interactive_deadline = deadline;
        }

        Ok(config)
    }

    /// Override the admission cap.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> CoderunnerResult<Self> {
        if max_concurrent == 0 {
            return Err(CoderunnerError::Config(
                "the admission cap must be at least 1".to_string(),
            ));
        }
        self.max_concurrent = max_concurrent;
        Ok(self)
    }

    /// Override the host directory backing per-execution work directories.
    pub fn with_workspace_dir(mut self, workspace_dir: PathBuf) -> Self {
        self.workspace_dir = workspace_dir;
        self
    }

    /// Override both batch deadlines.
    pub fn with_batch_deadlines(mut self, plain: Duration, stdin_detected: Duration) -> Self {
        self.batch_deadline = plain;
        self.batch_stdin_deadline = stdin_detected;
        self
    }

    /// Override the interactive deadline.
    pub fn with_interactive_deadline(mut self, deadline: Duration) -> Self {
        self.interactive_deadline = deadline;
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn deadline_from_env(var: &str) -> CoderunnerResult<Option<Duration>> {
    match std::env::var(var) {
        Ok(value) => {
            let secs = value.parse::<u64>().map_err(|_| {
                CoderunnerError::Config(format!(
                    "{} must be a number of seconds, got {:?}",
                    var, value
                ))
            })?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = OrchestratorConfig::new(5, PathBuf::from("/tmp/cr")).unwrap();

        assert_eq!(*config.get_max_concurrent(), 5);
        assert_eq!(*config.get_batch_deadline(), Duration::from_secs(10));
        assert_eq!(*config.get_batch_stdin_deadline(), Duration::from_secs(15));
        assert_eq!(*config.get_interactive_deadline(), Duration::from_secs(300));
        assert_eq!(config.get_container_workspace(), CONTAINER_WORKSPACE);
    }

    #[test]
    fn zero_cap_is_rejected() {
        let result = OrchestratorConfig::new(0, PathBuf::from("/tmp/cr"));
        assert!(matches!(result, Err(CoderunnerError::Config(_))));
    }

    #[test]
    fn deadline_overrides_apply() {
        let config = OrchestratorConfig::new(2, PathBuf::from("/tmp/cr"))
            .unwrap()
            .with_batch_deadlines(Duration::from_secs(3), Duration::from_secs(6))
            .with_interactive_deadline(Duration::from_secs(60));

        assert_eq!(*config.get_batch_deadline(), Duration::from_secs(3));
        assert_eq!(*config.get_batch_stdin_deadline(), Duration::from_secs(6));
        assert_eq!(*config.get_interactive_deadline(), Duration::from_secs(60));
    }
}
