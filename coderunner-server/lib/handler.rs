//! Request handlers for the coderunner server.
//!
//! This module implements:
//! - The batch run endpoint
//! - The health probe
//! - The language list

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use coderunner_core::orchestrator::ExecutionRequest;

use crate::error::{ServerError, ServerResult};
use crate::payload::{HealthResponse, RunCodeRequest, RunCodeResponse};
use crate::state::AppState;

//--------------------------------------------------------------------------------------------------
// Functions: REST API Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for the health probe.
pub async fn health() -> ServerResult<impl IntoResponse> {
    Ok(Json(HealthResponse {
        status: "UP".to_string(),
    }))
}

/// Handler for the language list.
pub async fn languages(State(state): State<AppState>) -> ServerResult<impl IntoResponse> {
    Ok(Json(state.get_orchestrator().registry().list()))
}

/// Handler for batch execution.
pub async fn run_code(
    State(state): State<AppState>,
    Json(payload): Json<RunCodeRequest>,
) -> ServerResult<impl IntoResponse> {
    let language = payload
        .language
        .ok_or_else(|| ServerError::Validation("missing required field: language".to_string()))?;
    let code = payload
        .code
        .ok_or_else(|| ServerError::Validation("missing required field: code".to_string()))?;

    let request = ExecutionRequest::new(language, code, payload.input);
    let outcome = state.get_orchestrator().execute_batch(request).await?;

    Ok(Json(RunCodeResponse {
        execution_id: outcome.get_execution_id().to_string(),
        status: *outcome.get_status(),
        output: outcome.get_output().clone(),
        exit_code: *outcome.get_exit_code(),
    }))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
