//! Staging batch API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stockyard_core::{
    staging::{ScrapeSession, StagingPurchaseOrder},
    submit_blob, BatchFilter, BatchKind, ProcessingStatus, StagingBatch, StagingError,
    BLOB_HANDLER,
};
use tracing::info;

use super::handlers::ErrorResponse;
use crate::metrics::SUBMISSIONS_TOTAL;
use crate::state::AppState;

/// Maximum allowed limit for batch queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for batch queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a blob
#[derive(Debug, Deserialize)]
pub struct CreateBlobBatchBody {
    /// Where the exported order file can be downloaded
    pub blob_url: String,
    /// Supplier the export came from, if known
    pub supplier_id: Option<String>,
}

/// Query parameters for listing batches
#[derive(Debug, Deserialize)]
pub struct ListBatchesParams {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub supplier_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Batch as exposed over the API. The raw payload is never returned since
/// cookie-file payloads carry session secrets.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub id: String,
    pub kind: BatchKind,
    pub processor_name: String,
    pub supplier_id: Option<String>,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub content_hash: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<StagingBatch> for BatchResponse {
    fn from(batch: StagingBatch) -> Self {
        Self {
            id: batch.id,
            kind: batch.kind,
            processor_name: batch.processor_name,
            supplier_id: batch.supplier_id,
            status: batch.status,
            error_message: batch.error_message,
            content_hash: batch.content_hash,
            created_at: batch.created_at.to_rfc3339(),
            started_at: batch.started_at.map(|t| t.to_rfc3339()),
            completed_at: batch.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Response for listing batches
#[derive(Debug, Serialize)]
pub struct ListBatchesResponse {
    pub batches: Vec<BatchResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// A batch with its orders and scrape sessions
#[derive(Debug, Serialize)]
pub struct BatchDetailResponse {
    pub batch: BatchResponse,
    pub orders: Vec<StagingPurchaseOrder>,
    pub sessions: Vec<ScrapeSession>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(e: StagingError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e.to_string()))
}

fn not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        ErrorResponse::new(format!("Batch not found: {}", id)),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue a blob import
pub async fn create_blob_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBlobBatchBody>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    match submit_blob(
        state.store(),
        BLOB_HANDLER,
        body.supplier_id.as_deref(),
        &body.blob_url,
    ) {
        Ok(batch) => {
            SUBMISSIONS_TOTAL.with_label_values(&["blob", "accepted"]).inc();
            info!(batch_id = %batch.id, blob_url = %body.blob_url, "Blob batch accepted");
            Ok((StatusCode::ACCEPTED, Json(BatchResponse::from(batch))))
        }
        Err(StagingError::InvalidValue(message)) => {
            SUBMISSIONS_TOTAL.with_label_values(&["blob", "rejected"]).inc();
            Err((StatusCode::BAD_REQUEST, ErrorResponse::new(message)))
        }
        Err(e) => Err(internal_error(e)),
    }
}

/// List batches with optional filters
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListBatchesParams>,
) -> Result<Json<ListBatchesResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = BatchFilter::new();

    if let Some(ref status) = params.status {
        match status.parse::<ProcessingStatus>() {
            Ok(status) => filter = filter.with_status(status),
            Err(e) => return Err((StatusCode::BAD_REQUEST, ErrorResponse::new(e.to_string()))),
        }
    }

    if let Some(ref kind) = params.kind {
        match kind.parse::<BatchKind>() {
            Ok(kind) => filter = filter.with_kind(kind),
            Err(e) => return Err((StatusCode::BAD_REQUEST, ErrorResponse::new(e.to_string()))),
        }
    }

    if let Some(ref supplier_id) = params.supplier_id {
        filter = filter.with_supplier(supplier_id.clone());
    }

    let total = state.store().count_batches(&filter).map_err(internal_error)?;
    let batches = state
        .store()
        .list_batches(&filter.with_limit(limit).with_offset(offset))
        .map_err(internal_error)?;

    Ok(Json(ListBatchesResponse {
        batches: batches.into_iter().map(BatchResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a batch with its orders and sessions
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchDetailResponse>, ApiError> {
    let batch = match state.store().get_batch(&id) {
        Ok(Some(batch)) => batch,
        Ok(None) => return Err(not_found(&id)),
        Err(e) => return Err(internal_error(e)),
    };

    let orders = state.store().list_orders(&id).map_err(internal_error)?;
    let sessions = state.store().list_sessions(&id).map_err(internal_error)?;

    Ok(Json(BatchDetailResponse {
        batch: BatchResponse::from(batch),
        orders,
        sessions,
    }))
}

/// Delete a batch and everything staged under it
pub async fn delete_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.store().delete_batch(&id) {
        Ok(true) => {
            info!(batch_id = %id, "Batch deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(not_found(&id)),
        Err(e) => Err(internal_error(e)),
    }
}
