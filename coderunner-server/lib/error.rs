//! Server error types and their HTTP mappings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coderunner_core::CoderunnerError;
use thiserror::Error;

use crate::payload::ErrorResponse;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a server operation.
pub type ServerResult<T> = Result<T, ServerError>;

/// Failures surfaced by the adapters, each with a fixed HTTP status.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Missing or malformed request fields, or an unknown language.
    #[error("{0}")]
    Validation(String),

    /// A request payload exceeded its size limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// The server configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// An orchestrator-side failure.
    #[error("{0}")]
    Internal(String),

    /// An I/O failure binding or serving the listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<CoderunnerError> for ServerError {
    fn from(error: CoderunnerError) -> Self {
        match &error {
            CoderunnerError::UnknownLanguage(_) | CoderunnerError::Validation(_) => {
                Self::Validation(error.to_string())
            }
            CoderunnerError::PayloadTooLarge { .. } => Self::PayloadTooLarge(error.to_string()),
            CoderunnerError::Config(_) => Self::Config(error.to_string()),
            _ => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Config(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_errors_map_onto_their_status_classes() {
        let unknown: ServerError = CoderunnerError::UnknownLanguage("lolcode".to_string()).into();
        assert!(matches!(unknown, ServerError::Validation(_)));

        let oversized: ServerError = CoderunnerError::PayloadTooLarge {
            field: "code",
            limit: 50_000,
        }
        .into();
        assert!(matches!(oversized, ServerError::PayloadTooLarge(_)));

        let build: ServerError = CoderunnerError::BuildFailed("no base image".to_string()).into();
        assert!(matches!(build, ServerError::Internal(_)));
    }

    #[test]
    fn responses_carry_the_expected_status_codes() {
        let bad = ServerError::Validation("missing field".to_string()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let large = ServerError::PayloadTooLarge("too big".to_string()).into_response();
        assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let internal = ServerError::Internal("engine down".to_string()).into_response();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
