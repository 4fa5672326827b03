//! Handler contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::handlers::{DownloadError, EmbeddingError};
use crate::scraper::ScrapeError;
use crate::staging::StagingError;

/// A schedulable unit of work with a stable identity.
pub trait WorkItem: Send + 'static {
    /// Identifier used in logs and reports.
    fn id(&self) -> String;
}

/// What a handler is for. Informational only; the engine treats all purposes alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Ingestion,
    Internal,
    Export,
}

/// Errors reported by handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The handler instance could not be built.
    #[error("handler construction failed: {0}")]
    Construction(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// A pluggable work source and processor.
///
/// The engine builds a fresh instance for every fetch and every processed item,
/// so implementations can hold per-task resources such as a store session.
#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    type Item: WorkItem;

    /// Query the handler's source for up to `max_items` pending units.
    ///
    /// Must not change any state: the engine may drop items beyond the limit.
    async fn fetch_work_items(
        &self,
        max_items: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Item>, HandlerError>;

    /// Perform the unit of work and persist its own status transitions.
    async fn process(&self, item: Self::Item, cancel: &CancellationToken)
        -> Result<(), HandlerError>;
}
