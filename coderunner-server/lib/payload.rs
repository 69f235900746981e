//! Request and response payload definitions for the coderunner server.
//!
//! This module defines the data structures for:
//! - The batch run request and response
//! - Error and health responses
//! - The interactive channel's JSON message envelope, tagged by `event`

use coderunner_core::exec::{ExecutionStatus, SessionEvent};
use coderunner_core::sandbox::StreamKind;
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types: REST API Payloads
//--------------------------------------------------------------------------------------------------

/// Request payload for a batch execution.
///
/// Fields are optional so missing ones can be rejected with a 400 and a
/// message instead of a deserialization failure.
#[derive(Debug, Deserialize)]
pub struct RunCodeRequest {
    /// Language tag from the registry.
    pub language: Option<String>,

    /// Source text to execute.
    pub code: Option<String>,

    /// Optional stdin text piped to the program.
    pub input: Option<String>,
}

/// Response payload for a completed batch execution.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCodeResponse {
    /// The execution's unique id.
    pub execution_id: String,

    /// Success iff the sandboxed process exited with code 0.
    pub status: ExecutionStatus,

    /// Combined stdout and stderr in frame order.
    pub output: String,

    /// The sandbox exit code.
    pub exit_code: i64,
}

/// Error body for failed requests.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable description of the failure.
    pub error: String,
}

/// Health probe response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `UP` once the engine client and the registry are initialized.
    pub status: String,
}

//--------------------------------------------------------------------------------------------------
// Types: Interactive Channel Messages
//--------------------------------------------------------------------------------------------------

/// Messages arriving on the interactive channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Start a session; at most one concurrent execution per channel.
    ExecuteInteractive {
        /// Language tag from the registry.
        language: String,

        /// Source text to execute.
        code: String,
    },

    /// Stdin for a running execution; dropped unless the id matches.
    #[serde(rename_all = "camelCase")]
    Input {
        /// The execution the input is addressed to.
        execution_id: String,

        /// The text to deliver; one `\n` is appended before delivery.
        data: String,
    },
}

/// Messages sent to the interactive caller.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Issued exactly once after admission, before any output.
    #[serde(rename_all = "camelCase")]
    ExecutionStart {
        /// The id input messages must carry.
        execution_id: String,
    },

    /// One chunk of program output.
    Output {
        /// Lossy UTF-8 text of the frame.
        data: String,

        /// Present (as `stderr`) only for standard-error frames.
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        stream: Option<StreamLabel>,
    },

    /// Issued exactly once per execution, error paths included.
    #[serde(rename_all = "camelCase")]
    ExecutionComplete {
        /// Outcome classification.
        status: ExecutionStatus,

        /// Sandbox exit code; `-1` when the sandbox never ran.
        exit_code: i64,

        /// The execution's id; absent when the session failed validation
        /// before admission.
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
    },

    /// Precedes `execution-complete` when a failure occurred outside the
    /// sandboxed process itself.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Wire label for non-default output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamLabel {
    /// The frame came from standard error.
    Stderr,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Started { execution_id } => ServerMessage::ExecutionStart {
                execution_id: execution_id.to_string(),
            },
            SessionEvent::Output { data, kind } => ServerMessage::Output {
                data,
                stream: match kind {
                    StreamKind::Stdout => None,
                    StreamKind::Stderr => Some(StreamLabel::Stderr),
                },
            },
            SessionEvent::Error { message } => ServerMessage::Error { message },
            SessionEvent::Completed {
                execution_id,
                status,
                exit_code,
            } => ServerMessage::ExecutionComplete {
                status,
                exit_code,
                execution_id: Some(execution_id.to_string()),
            },
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn execute_interactive_messages_parse() {
        let message: ClientMessage = serde_json::from_value(json!({
            "event": "execute-interactive",
            "language": "python",
            "code": "print(input())"
        }))
        .unwrap();

        match message {
            ClientMessage::ExecuteInteractive { language, code } => {
                assert_eq!(language, "python");
                assert_eq!(code, "print(input())");
            }
            other => panic!("parsed the wrong variant: {:?}", other),
        }
    }

    #[test]
    fn input_messages_parse_with_camel_case_ids() {
        let message: ClientMessage = serde_json::from_value(json!({
            "event": "input",
            "executionId": "abc-123",
            "data": "42"
        }))
        .unwrap();

        match message {
            ClientMessage::Input { execution_id, data } => {
                assert_eq!(execution_id, "abc-123");
                assert_eq!(data, "42");
            }
            other => panic!("parsed the wrong variant: {:?}", other),
        }
    }

    #[test]
    fn unknown_events_are_rejected() {
        let result: Result<ClientMessage, _> = serde_json::from_value(json!({
            "event": "reboot",
            "data": "now"
        }));

        assert!(result.is_err());
    }

    #[test]
    fn stdout_frames_omit_the_type_field() {
        let message = ServerMessage::Output {
            data: "hello\n".to_string(),
            stream: None,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"event": "output", "data": "hello\n"}));
    }

    #[test]
    fn stderr_frames_carry_the_type_field() {
        let message = ServerMessage::Output {
            data: "warning\n".to_string(),
            stream: Some(StreamLabel::Stderr),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"event": "output", "data": "warning\n", "type": "stderr"})
        );
    }

    #[test]
    fn completion_messages_serialize_in_camel_case() {
        let message = ServerMessage::ExecutionComplete {
            status: ExecutionStatus::Success,
            exit_code: 0,
            execution_id: Some("abc-123".to_string()),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "execution-complete",
                "status": "success",
                "exitCode": 0,
                "executionId": "abc-123"
            })
        );
    }

    #[test]
    fn session_events_map_onto_wire_messages() {
        let id = Uuid::new_v4();

        let start: ServerMessage = SessionEvent::Started { execution_id: id }.into();
        let value = serde_json::to_value(&start).unwrap();
        assert_eq!(value["event"], "execution-start");
        assert_eq!(value["executionId"], id.to_string());

        let stderr: ServerMessage = SessionEvent::Output {
            data: "oops".to_string(),
            kind: StreamKind::Stderr,
        }
        .into();
        let value = serde_json::to_value(&stderr).unwrap();
        assert_eq!(value["type"], "stderr");
    }
}
