//! Orchestrator API handlers.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::info;

use dropwatch_core::{ActivityEvent, OrchestratorStatus};

use super::handlers::{api_error, ApiError, MessageResponse};
use super::middleware::AuthUser;
use crate::state::AppState;

/// Get orchestrator status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().status())
}

/// Start the cycle loop
pub async fn start(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.orchestrator().start() {
        return Err(api_error(
            StatusCode::CONFLICT,
            "Orchestrator already running",
        ));
    }

    state.activity().try_emit(ActivityEvent::OrchestratorToggled {
        running: true,
        requested_by: user_id,
    });
    Ok(Json(MessageResponse {
        message: "Orchestrator started".to_string(),
    }))
}

/// Stop the cycle loop, waiting up to one drain period for live attempts
pub async fn stop(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.orchestrator().stop().await {
        return Err(api_error(StatusCode::CONFLICT, "Orchestrator not running"));
    }

    state.activity().try_emit(ActivityEvent::OrchestratorToggled {
        running: false,
        requested_by: user_id,
    });
    Ok(Json(MessageResponse {
        message: "Orchestrator stopped".to_string(),
    }))
}

/// Cut the current idle wait short
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let orchestrator = state.orchestrator();
    if !orchestrator.is_running() {
        return Err(api_error(StatusCode::CONFLICT, "Orchestrator not running"));
    }

    orchestrator.trigger_refresh(&user_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Refresh requested".to_string(),
        }),
    ))
}

/// Lift the quarantine on the shared resource
pub async fn restore_resource(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.orchestrator().restore_resource(&user_id) {
        return Err(api_error(
            StatusCode::CONFLICT,
            "Shared resource is not retired",
        ));
    }

    info!(requested_by = %user_id, "Resource restored via API");
    Ok(Json(MessageResponse {
        message: "Shared resource restored".to_string(),
    }))
}
