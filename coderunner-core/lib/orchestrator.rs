//! The orchestrator facade adapters talk to.
//!
//! This module provides:
//! - Request validation (language, source and stdin size limits)
//! - Admission onto the FIFO queue under the global concurrency cap
//! - The batch entry point, resolving to a [`BatchOutcome`]
//! - The interactive entry point, resolving to a [`SessionHandle`] wired to
//!   the caller's event channel

use std::sync::Arc;

use getset::Getters;
use tokio::sync::{mpsc, oneshot};

use crate::config::OrchestratorConfig;
use crate::exec::{
    batch, interactive, AdmissionQueue, BatchOutcome, Execution, ExecutionMode, InputMessage,
    SessionEvent, SessionHandle,
};
use crate::registry::LanguageRegistry;
use crate::sandbox::SandboxDriver;
use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Maximum source size in Unicode code points.
pub const MAX_SOURCE_CODE_POINTS: usize = 50_000;

/// Maximum stdin size in Unicode code points.
pub const MAX_STDIN_CODE_POINTS: usize = 10_000;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A validated-shape execution request.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ExecutionRequest {
    /// Language tag, resolved against the registry on admission.
    language: String,

    /// Source text to execute.
    source: String,

    /// Optional stdin text.
    stdin: Option<String>,
}

/// The execution orchestrator: registry, driver, queue, and config.
pub struct Orchestrator {
    driver: SandboxDriver,
    registry: Arc<LanguageRegistry>,
    config: Arc<OrchestratorConfig>,
    queue: AdmissionQueue,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl ExecutionRequest {
    /// Bundle a request from its raw parts.
    pub fn new(language: String, source: String, stdin: Option<String>) -> Self {
        Self {
            language,
            source,
            stdin,
        }
    }

    /// Enforce the size limits; both are counted in code points, not bytes.
    pub fn validate(&self) -> CoderunnerResult<()> {
        if self.source.chars().count() > MAX_SOURCE_CODE_POINTS {
            return Err(CoderunnerError::PayloadTooLarge {
                field: "code",
                limit: MAX_SOURCE_CODE_POINTS,
            });
        }
        if let Some(stdin) = &self.stdin {
            if stdin.chars().count() > MAX_STDIN_CODE_POINTS {
                return Err(CoderunnerError::PayloadTooLarge {
                    field: "input",
                    limit: MAX_STDIN_CODE_POINTS,
                });
            }
        }
        Ok(())
    }
}

impl Orchestrator {
    /// Connect to the container engine and spawn the admission queue.
    pub fn new(config: OrchestratorConfig, registry: LanguageRegistry) -> CoderunnerResult<Self> {
        let driver = SandboxDriver::connect()?;
        let queue = AdmissionQueue::new(*config.get_max_concurrent());

        Ok(Self {
            driver,
            registry: Arc::new(registry),
            config: Arc::new(config),
            queue,
        })
    }

    /// The language registry backing this orchestrator.
    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Probe the container engine socket.
    pub async fn ping(&self) -> CoderunnerResult<()> {
        self.driver.ping().await
    }

    /// Run a batch execution: validate, admit, and await the outcome.
    pub async fn execute_batch(&self, request: ExecutionRequest) -> CoderunnerResult<BatchOutcome> {
        let spec = self.registry.lookup(request.get_language())?.clone();
        request.validate()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let driver = self.driver.clone();
        let config = self.config.clone();
        self.queue.enqueue(Box::pin(async move {
            let outcome = batch::run(driver, config, spec, request).await;
            let _ = reply_tx.send(outcome);
        }))?;

        reply_rx.await.map_err(|_| CoderunnerError::QueueClosed)?
    }

    /// Admit an interactive session: validate, mint the execution, and wire
    /// the caller's event channel. The returned handle carries the id input
    /// messages must be addressed to.
    pub fn start_interactive(
        &self,
        language: &str,
        source: String,
        events: mpsc::Sender<SessionEvent>,
    ) -> CoderunnerResult<SessionHandle> {
        let spec = self.registry.lookup(language)?.clone();
        let request = ExecutionRequest::new(language.to_string(), source, None);
        request.validate()?;

        let execution = Execution::new(
            ExecutionMode::Interactive,
            self.config.get_workspace_dir(),
            *self.config.get_interactive_deadline(),
        );
        let (input_tx, input_rx) = mpsc::unbounded_channel::<InputMessage>();
        let handle = SessionHandle::new(*execution.get_id(), input_tx);

        let driver = self.driver.clone();
        let config = self.config.clone();
        let source = request.get_source().clone();
        self.queue.enqueue(Box::pin(async move {
            interactive::run(driver, config, spec, source, execution, events, input_rx).await;
        }))?;

        Ok(handle)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: String, stdin: Option<String>) -> ExecutionRequest {
        ExecutionRequest::new("python".to_string(), source, stdin)
    }

    #[test]
    fn source_at_the_limit_passes() {
        let source = "x".repeat(MAX_SOURCE_CODE_POINTS);
        assert!(request(source, None).validate().is_ok());
    }

    #[test]
    fn oversized_source_is_rejected() {
        let source = "x".repeat(MAX_SOURCE_CODE_POINTS + 1);
        let result = request(source, None).validate();
        assert!(matches!(
            result,
            Err(CoderunnerError::PayloadTooLarge { field: "code", .. })
        ));
    }

    #[test]
    fn oversized_stdin_is_rejected() {
        let stdin = "y".repeat(MAX_STDIN_CODE_POINTS + 1);
        let result = request("print()".to_string(), Some(stdin)).validate();
        assert!(matches!(
            result,
            Err(CoderunnerError::PayloadTooLarge { field: "input", .. })
        ));
    }

    #[test]
    fn limits_count_code_points_not_bytes() {
        // Two bytes each in UTF-8, still one code point each.
        let source = "é".repeat(MAX_SOURCE_CODE_POINTS);
        assert!(request(source, None).validate().is_ok());
    }

    mod live_engine {
        //! End-to-end scenarios needing a running container engine and the
        //! prebuilt language images; run with `cargo test -- --ignored`.

        use crate::config::OrchestratorConfig;
        use crate::registry::LanguageRegistry;

        use super::*;

        fn orchestrator() -> Orchestrator {
            let workspace = std::env::temp_dir().join("coderunner-e2e");
            let config = OrchestratorConfig::new(5, workspace).unwrap();
            Orchestrator::new(config, LanguageRegistry::with_defaults().unwrap()).unwrap()
        }

        #[tokio::test]
        #[ignore = "requires a container engine and the coderunner-* images"]
        async fn hello_python_batch() {
            let outcome = orchestrator()
                .execute_batch(ExecutionRequest::new(
                    "python".to_string(),
                    "print('Hello')".to_string(),
                    None,
                ))
                .await
                .unwrap();

            assert_eq!(*outcome.get_exit_code(), 0);
            assert_eq!(outcome.get_output(), "Hello\n");
        }

        #[tokio::test]
        #[ignore = "requires a container engine and the coderunner-* images"]
        async fn batch_with_piped_stdin() {
            let outcome = orchestrator()
                .execute_batch(ExecutionRequest::new(
                    "python".to_string(),
                    "print(input())".to_string(),
                    Some("abc".to_string()),
                ))
                .await
                .unwrap();

            assert_eq!(*outcome.get_exit_code(), 0);
            assert_eq!(outcome.get_output(), "abc\n");
        }

        #[tokio::test]
        #[ignore = "requires a container engine and the coderunner-* images"]
        async fn compile_errors_surface_as_sandbox_output() {
            let outcome = orchestrator()
                .execute_batch(ExecutionRequest::new(
                    "cpp".to_string(),
                    "int main( { return 0; }".to_string(),
                    None,
                ))
                .await
                .unwrap();

            assert_ne!(*outcome.get_exit_code(), 0);
            assert!(outcome.get_output().contains("error"));
        }
    }
}
