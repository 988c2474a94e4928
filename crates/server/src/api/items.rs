//! Item state API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use dropwatch_core::{ItemState, OrchestratorError, WorkerInfo};

use super::handlers::{api_error, ApiError};
use super::middleware::AuthUser;
use crate::state::AppState;

/// Response for listing items
#[derive(Debug, Serialize)]
pub struct ListItemsResponse {
    /// Tracked items in priority order
    pub items: Vec<ItemState>,
    pub total: usize,
}

/// Response for an abort request
#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub item_id: String,
    pub attempt_id: u64,
    pub message: String,
}

fn map_error(e: OrchestratorError) -> ApiError {
    match e {
        OrchestratorError::ItemNotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        OrchestratorError::NoLiveAttempt(_) | OrchestratorError::AttemptCompleting { .. } => {
            api_error(StatusCode::CONFLICT, e.to_string())
        }
        OrchestratorError::InvalidSettings(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        OrchestratorError::State(_) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn list_items(State(state): State<Arc<AppState>>) -> Json<ListItemsResponse> {
    let items = state.orchestrator().get_all_states();
    Json(ListItemsResponse {
        total: items.len(),
        items,
    })
}

pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemState>, ApiError> {
    state
        .orchestrator()
        .get_item_state(&id)
        .map(Json)
        .map_err(map_error)
}

/// Force the deadline of the item's running attempt.
pub async fn abort_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthUser(user_id): AuthUser,
) -> Result<(StatusCode, Json<AbortResponse>), ApiError> {
    let WorkerInfo { attempt_id, .. } = state
        .orchestrator()
        .abort_attempt(&id, &user_id)
        .map_err(map_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AbortResponse {
            item_id: id,
            attempt_id,
            message: "Abort signalled; the attempt records its own failure".to_string(),
        }),
    ))
}
