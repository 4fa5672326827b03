//! Processing engine API handlers.

use axum::{extract::State, Json};
use std::sync::Arc;
use stockyard_core::{EngineStatus, HandlerInfo};

use crate::state::AppState;

/// Running flag, cycle count and the last cycle's report.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<EngineStatus> {
    Json(state.engine().status().await)
}

/// Registered handlers in registration order.
pub async fn list_handlers(State(state): State<Arc<AppState>>) -> Json<Vec<HandlerInfo>> {
    Json(state.engine().registry().infos())
}
