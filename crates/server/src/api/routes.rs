use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{batches, cookie_files, engine, handlers, middleware};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Engine
        .route("/engine/status", get(engine::get_status))
        .route("/engine/handlers", get(engine::list_handlers))
        // Intake
        .route("/cookie-files", post(cookie_files::submit))
        .route("/batches/blob", post(batches::create_blob_batch))
        // Batches
        .route("/batches", get(batches::list_batches))
        .route(
            "/batches/{id}",
            get(batches::get_batch).delete(batches::delete_batch),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::get_metrics))
        .layer(axum_middleware::from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
