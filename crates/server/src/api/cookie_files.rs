//! Cookie-file intake.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use stockyard_core::{submit_cookie_file, CookieFile, Submission};
use tracing::{info, warn};

use super::batches::BatchResponse;
use super::handlers::ErrorResponse;
use crate::metrics::SUBMISSIONS_TOTAL;
use crate::state::AppState;

/// Response for a cookie file that was already submitted
#[derive(Debug, Serialize)]
pub struct DuplicateResponse {
    pub error: String,
    pub existing_batch_id: String,
}

/// Accept a captured cookie file and queue a scrape of its supplier.
///
/// The body is the cookie file JSON as produced by the capture tool.
pub async fn submit(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let cookie_file = match CookieFile::from_json(&body) {
        Ok(cookie_file) => cookie_file,
        Err(e) => {
            SUBMISSIONS_TOTAL
                .with_label_values(&["cookie_file", "rejected"])
                .inc();
            return (StatusCode::BAD_REQUEST, ErrorResponse::new(e.to_string())).into_response();
        }
    };

    let Some(profile) = state.supplier(&cookie_file.supplier_id) else {
        SUBMISSIONS_TOTAL
            .with_label_values(&["cookie_file", "rejected"])
            .inc();
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(format!("Unknown supplier: {}", cookie_file.supplier_id)),
        )
            .into_response();
    };

    match submit_cookie_file(state.store(), &cookie_file, &profile.handler_name()) {
        Ok(Submission::Accepted(batch)) => {
            SUBMISSIONS_TOTAL
                .with_label_values(&["cookie_file", "accepted"])
                .inc();
            info!(
                batch_id = %batch.id,
                supplier = %cookie_file.supplier_id,
                cookie_file_id = %cookie_file.id,
                "Cookie file accepted"
            );
            (StatusCode::ACCEPTED, Json(BatchResponse::from(batch))).into_response()
        }
        Ok(Submission::Duplicate(existing)) => {
            SUBMISSIONS_TOTAL
                .with_label_values(&["cookie_file", "duplicate"])
                .inc();
            warn!(
                existing_batch_id = %existing,
                cookie_file_id = %cookie_file.id,
                "Duplicate cookie file submitted"
            );
            (
                StatusCode::CONFLICT,
                Json(DuplicateResponse {
                    error: "Cookie file already submitted".to_string(),
                    existing_batch_id: existing,
                }),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new(e.to_string()),
        )
            .into_response(),
    }
}
