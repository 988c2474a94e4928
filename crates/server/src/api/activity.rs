use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use dropwatch_core::{ActivityFilter, ActivityRecord};

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for activity queries
const MAX_LIMIT: usize = 1000;

/// Default limit for activity queries
const DEFAULT_LIMIT: usize = 100;

/// Query parameters for the activity endpoint
#[derive(Debug, Deserialize)]
pub struct ActivityQueryParams {
    pub item_id: Option<String>,
    pub event_type: Option<String>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ActivityQueryResponse {
    /// Newest first
    pub events: Vec<ActivityRecord>,
    /// Total number of matching events
    pub total: usize,
    pub limit: usize,
}

pub async fn query_activity(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivityQueryParams>,
) -> Result<Json<ActivityQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut filter = ActivityFilter::new();
    if let Some(item_id) = params.item_id {
        filter = filter.with_item_id(item_id);
    }
    if let Some(event_type) = params.event_type {
        filter = filter.with_event_type(event_type);
    }

    let store = state.activity_store();
    let total = store.count(&filter).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count activity: {}", e),
        )
    })?;
    let events = store.query(&filter.with_limit(limit)).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query activity: {}", e),
        )
    })?;

    Ok(Json(ActivityQueryResponse {
        events,
        total,
        limit,
    }))
}
