use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::middleware::{auth_middleware, metrics_middleware};
use super::{activity, handlers, items, orchestrator, ws};
use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

/// Prometheus scrape endpoint
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    collect_dynamic_metrics(&state);
    encode_metrics()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public health check
    let public_routes = Router::new().route("/health", get(handlers::health));

    // API routes (authenticated)
    let api_routes = Router::new()
        // Config
        .route("/config", get(handlers::get_config))
        .route("/config/reload", post(handlers::reload_config))
        // Items
        .route("/items", get(items::list_items))
        .route("/items/{id}", get(items::get_item))
        .route("/items/{id}/abort", post(items::abort_item))
        // Orchestrator
        .route("/orchestrator/status", get(orchestrator::get_status))
        .route("/orchestrator/start", post(orchestrator::start))
        .route("/orchestrator/stop", post(orchestrator::stop))
        .route("/orchestrator/refresh", post(orchestrator::refresh))
        // Shared resource
        .route("/resource/restore", post(orchestrator::restore_resource))
        // Activity log
        .route("/activity", get(activity::query_activity))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/v1", public_routes.merge(api_routes))
        .route("/ws", get(ws::ws_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
