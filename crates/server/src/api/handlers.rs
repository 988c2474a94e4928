use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use dropwatch_core::{config_hash, load_config, validate_config, ActivityEvent, SanitizedConfig};

use super::middleware::AuthUser;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body shared by every API handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub config_hash: String,
    pub items: usize,
    /// Settings are swapped in at the top of the next cycle.
    pub applies_at: String,
}

/// Re-read the config file and queue its cycle settings.
///
/// Only the `[orchestrator]` and `[[items]]` sections take effect without a
/// restart.
pub async fn reload_config(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ReloadResponse>, ApiError> {
    let path = state.config_path().map(|p| p.to_path_buf()).ok_or_else(|| {
        api_error(
            StatusCode::CONFLICT,
            "Server was not started from a config file",
        )
    })?;

    let config = load_config(&path).map_err(|e| {
        warn!("Config reload failed: {}", e);
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    })?;
    validate_config(&config).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let settings = config.cycle_settings();
    let items = settings.items.len();
    state
        .orchestrator()
        .update_settings(settings)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let hash = config_hash(&config);
    state.set_config(config);
    info!(config_hash = %hash, requested_by = %user_id, "Configuration reloaded");
    state.activity().try_emit(ActivityEvent::ConfigReloaded {
        config_hash: hash.clone(),
        requested_by: user_id,
    });

    Ok(Json(ReloadResponse {
        config_hash: hash,
        items,
        applies_at: "next_cycle".to_string(),
    }))
}
