//! Router configuration for the coderunner server.

use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::state::AppState;
use crate::{handler, middleware as app_middleware, ws};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Create a new router with the given state.
pub fn create_router(state: AppState) -> Router {
    let rest_api = Router::new()
        .route("/run", post(handler::run_code))
        .route("/health", get(handler::health))
        .route("/languages", get(handler::languages));

    Router::new()
        .nest("/api/v1", rest_api)
        .route("/ws", get(ws::interactive_ws))
        .layer(middleware::from_fn(app_middleware::logging_middleware))
        .with_state(state)
}
