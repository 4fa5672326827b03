//! Staging storage traits and query types.

use std::sync::Arc;

use thiserror::Error;

use super::{
    BatchKind, ProcessingStatus, ProductImage, ScrapeSession, StagingBatch, StagingPurchaseOrder,
    StagingPurchaseOrderItem, StagingSaleItem,
};

/// Error type for staging operations.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A status change that the lifecycle does not allow.
    #[error("cannot move {entity} {id} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// A stored or submitted value could not be interpreted.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

/// Filter for querying batches.
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub status: Option<ProcessingStatus>,
    pub kind: Option<BatchKind>,
    pub processor_name: Option<String>,
    pub supplier_id: Option<String>,
    pub content_hash: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl BatchFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: BatchKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_processor(mut self, processor_name: impl Into<String>) -> Self {
        self.processor_name = Some(processor_name.into());
        self
    }

    pub fn with_supplier(mut self, supplier_id: impl Into<String>) -> Self {
        self.supplier_id = Some(supplier_id.into());
        self
    }

    pub fn with_content_hash(mut self, content_hash: impl Into<String>) -> Self {
        self.content_hash = Some(content_hash.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// One isolated session against the staging store.
///
/// A session is bound to a single connection. Concurrent tasks each open
/// their own through [`StagingDatabase::open_session`].
pub trait StagingStore: Send + Sync {
    /// Persist a new batch.
    fn insert_batch(&self, batch: &StagingBatch) -> Result<(), StagingError>;

    fn get_batch(&self, id: &str) -> Result<Option<StagingBatch>, StagingError>;

    /// List batches matching the filter, oldest first.
    fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<StagingBatch>, StagingError>;

    fn count_batches(&self, filter: &BatchFilter) -> Result<i64, StagingError>;

    /// Find the earliest batch carrying this content hash that has not Failed.
    /// Failed batches ingested nothing, so their content may be submitted again.
    fn find_batch_by_hash(&self, content_hash: &str) -> Result<Option<StagingBatch>, StagingError>;

    /// Insert `batch` unless a batch that has not Failed already carries its
    /// content hash, in which case that batch is returned and nothing is written.
    /// Lookup and insert happen in one write transaction.
    fn insert_batch_unless_duplicate(
        &self,
        batch: &StagingBatch,
    ) -> Result<Option<StagingBatch>, StagingError>;

    /// Save the mutable fields of an existing batch.
    fn save_batch(&self, batch: &StagingBatch) -> Result<(), StagingError>;

    /// Delete a batch together with its orders, items and sessions.
    /// Returns `false` if no such batch existed.
    fn delete_batch(&self, id: &str) -> Result<bool, StagingError>;

    /// Atomically persist a scrape session together with its batch.
    /// The batch is inserted when new and saved when it already exists.
    fn begin_scrape(&self, batch: &StagingBatch, session: &ScrapeSession)
        -> Result<(), StagingError>;

    fn save_session(&self, session: &ScrapeSession) -> Result<(), StagingError>;

    fn get_session(&self, id: &str) -> Result<Option<ScrapeSession>, StagingError>;

    fn list_sessions(&self, batch_id: &str) -> Result<Vec<ScrapeSession>, StagingError>;

    fn insert_order(&self, order: &StagingPurchaseOrder) -> Result<(), StagingError>;

    fn get_order(&self, id: &str) -> Result<Option<StagingPurchaseOrder>, StagingError>;

    /// Orders of a batch in creation order.
    fn list_orders(&self, batch_id: &str) -> Result<Vec<StagingPurchaseOrder>, StagingError>;

    fn save_order(&self, order: &StagingPurchaseOrder) -> Result<(), StagingError>;

    fn insert_purchase_item(&self, item: &StagingPurchaseOrderItem) -> Result<(), StagingError>;

    fn get_purchase_item(&self, id: &str) -> Result<Option<StagingPurchaseOrderItem>, StagingError>;

    fn list_purchase_items(&self, order_id: &str)
        -> Result<Vec<StagingPurchaseOrderItem>, StagingError>;

    fn save_purchase_item(&self, item: &StagingPurchaseOrderItem) -> Result<(), StagingError>;

    fn insert_sale_item(&self, item: &StagingSaleItem) -> Result<(), StagingError>;

    fn get_sale_item(&self, id: &str) -> Result<Option<StagingSaleItem>, StagingError>;

    fn list_sale_items(&self, order_id: &str) -> Result<Vec<StagingSaleItem>, StagingError>;

    fn save_sale_item(&self, item: &StagingSaleItem) -> Result<(), StagingError>;

    fn insert_image(&self, image: &ProductImage) -> Result<(), StagingError>;

    fn get_image(&self, id: &str) -> Result<Option<ProductImage>, StagingError>;

    /// Images with neither an embedding nor a recorded failure.
    fn list_images_missing_embedding(&self, limit: i64)
        -> Result<Vec<ProductImage>, StagingError>;

    fn save_image(&self, image: &ProductImage) -> Result<(), StagingError>;
}

/// Opens isolated store sessions.
pub trait StagingDatabase: Send + Sync {
    /// Open a session with its own connection.
    fn open_session(&self) -> Result<Arc<dyn StagingStore>, StagingError>;
}
