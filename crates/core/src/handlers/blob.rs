//! Engine handler for uploaded blob batches.
//!
//! A blob batch points at an exported order file. Processing downloads it,
//! skips content that was already ingested, and imports the canonical order
//! export format:
//!
//! ```json
//! {"kind": "purchase", "orders": [{"reference": "PO-1", "lines": [...]}]}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Download;
use crate::engine::{HandlerError, WorkHandler, WorkItem};
use crate::scraper::parse_date;
use crate::staging::{
    content_hash, BatchFilter, BatchKind, ProcessingStatus, StagedLine, StagingBatch,
    StagingDatabase, StagingError, StagingPurchaseOrder, StagingPurchaseOrderItem,
    StagingSaleItem, StagingStore,
};

/// Message stored on batches whose content has no importer.
pub const NO_IMPORTER: &str = "no importer for this content";

/// A Pending blob-upload batch.
#[derive(Debug, Clone)]
pub struct BlobBatchItem {
    pub batch: StagingBatch,
}

impl WorkItem for BlobBatchItem {
    fn id(&self) -> String {
        self.batch.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExportKind {
    Purchase,
    Sale,
}

#[derive(Debug, Deserialize)]
struct OrderExport {
    kind: ExportKind,
    orders: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExportedOrder {
    reference: String,
    #[serde(default)]
    order_date: Option<String>,
    #[serde(default)]
    total_cents: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    lines: Vec<StagedLine>,
}

/// Imports blob batches. Each instance owns its own store session.
pub struct BlobBatchHandler {
    store: Arc<dyn StagingStore>,
    download: Download,
}

impl BlobBatchHandler {
    pub fn new(store: Arc<dyn StagingStore>, download: Download) -> Self {
        Self { store, download }
    }

    /// Factory building handlers on fresh store sessions.
    pub fn factory(
        database: Arc<dyn StagingDatabase>,
        download: Download,
    ) -> impl Fn() -> Result<BlobBatchHandler, HandlerError> + Send + Sync + 'static {
        move || {
            Ok(BlobBatchHandler::new(
                database.open_session()?,
                Arc::clone(&download),
            ))
        }
    }

    fn fail_batch(&self, batch: &mut StagingBatch, message: String) -> Result<(), HandlerError> {
        batch.fail(message.clone(), Utc::now())?;
        self.store.save_batch(batch)?;
        Err(HandlerError::Other(message))
    }

    /// Another batch that holds identical content and has not Failed.
    ///
    /// The earliest such batch owns the content; `batch` must already be saved
    /// with its hash so concurrent imports of the same bytes agree on the owner.
    fn find_duplicate(&self, batch: &StagingBatch, hash: &str) -> Result<Option<String>, StagingError> {
        Ok(self
            .store
            .find_batch_by_hash(hash)?
            .filter(|owner| owner.id != batch.id)
            .map(|owner| owner.id))
    }

    /// Import one exported order; failures are recorded on the order row.
    fn import_order(&self, batch_id: &str, kind: ExportKind, index: usize, value: serde_json::Value) -> Result<bool, StagingError> {
        let reference = value
            .get("reference")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("order-{}", index + 1));

        let mut order = StagingPurchaseOrder::new(batch_id, reference);
        order.raw_data = Some(value.clone());
        order.start(Utc::now())?;
        self.store.insert_order(&order)?;

        let exported = match serde_json::from_value::<ExportedOrder>(value) {
            Ok(exported) => exported,
            Err(e) => {
                warn!(batch_id = %batch_id, order = %order.supplier_reference, error = %e, "Unreadable exported order");
                order.fail(format!("unreadable order: {}", e), Utc::now())?;
                self.store.save_order(&order)?;
                return Ok(false);
            }
        };

        order.supplier_reference = exported.reference;
        order.order_date = exported.order_date.as_deref().and_then(parse_date);
        order.total_cents = exported.total_cents;
        order.currency = exported.currency;

        for line in exported.lines {
            match kind {
                ExportKind::Purchase => self
                    .store
                    .insert_purchase_item(&StagingPurchaseOrderItem::new(&order.id, line))?,
                ExportKind::Sale => self
                    .store
                    .insert_sale_item(&StagingSaleItem::new(&order.id, line))?,
            }
        }

        order.complete(Utc::now())?;
        self.store.save_order(&order)?;
        Ok(true)
    }
}

#[async_trait]
impl WorkHandler for BlobBatchHandler {
    type Item = BlobBatchItem;

    async fn fetch_work_items(
        &self,
        max_items: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<BlobBatchItem>, HandlerError> {
        let filter = BatchFilter::new()
            .with_status(ProcessingStatus::Pending)
            .with_kind(BatchKind::BlobUpload)
            .with_limit(max_items as i64);

        Ok(self
            .store
            .list_batches(&filter)?
            .into_iter()
            .map(|batch| BlobBatchItem { batch })
            .collect())
    }

    async fn process(
        &self,
        item: BlobBatchItem,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let mut batch = item.batch;
        batch.start(Utc::now())?;
        self.store.save_batch(&batch)?;

        let Some(url) = batch.raw_payload.clone().filter(|url| !url.trim().is_empty()) else {
            return self.fail_batch(&mut batch, "batch has no blob url".to_string());
        };

        let downloaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            bytes = (self.download)(url.clone()) => Some(bytes),
        };
        let bytes = match downloaded {
            None => return self.fail_batch(&mut batch, "cancelled".to_string()),
            Some(Err(e)) => return self.fail_batch(&mut batch, e.to_string()),
            Some(Ok(bytes)) => bytes,
        };

        let hash = content_hash(&bytes);
        batch.content_hash = Some(hash.clone());
        self.store.save_batch(&batch)?;

        if let Some(existing) = self.find_duplicate(&batch, &hash)? {
            batch.complete(Utc::now())?;
            batch.error_message = Some(format!(
                "skipped: identical content already ingested by batch {}",
                existing
            ));
            self.store.save_batch(&batch)?;
            info!(batch_id = %batch.id, duplicate_of = %existing, "Skipped duplicate blob");
            return Ok(());
        }

        let export = match serde_json::from_slice::<OrderExport>(&bytes) {
            Ok(export) => export,
            Err(e) => {
                warn!(batch_id = %batch.id, error = %e, "Blob content not recognized");
                batch.mark_partial(NO_IMPORTER, Utc::now())?;
                self.store.save_batch(&batch)?;
                return Ok(());
            }
        };

        let total = export.orders.len();
        let mut failed = 0;
        for (index, value) in export.orders.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return self.fail_batch(&mut batch, "cancelled".to_string());
            }
            if !self.import_order(&batch.id, export.kind, index, value)? {
                failed += 1;
            }
        }

        batch.complete(Utc::now())?;
        self.store.save_batch(&batch)?;
        info!(
            batch_id = %batch.id,
            orders = total,
            failed,
            "Blob batch imported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::{submit_blob, SqliteStagingDatabase};
    use crate::testing::{fixtures, MockDownloads};

    fn setup(downloads: &MockDownloads) -> (Arc<dyn StagingStore>, BlobBatchHandler) {
        let db: Arc<dyn StagingDatabase> = Arc::new(SqliteStagingDatabase::in_memory().unwrap());
        let store = db.open_session().unwrap();
        let handler = BlobBatchHandler::factory(db, downloads.download())().unwrap();
        (store, handler)
    }

    async fn process(handler: &BlobBatchHandler, batch: &StagingBatch) -> Result<(), HandlerError> {
        handler
            .process(
                BlobBatchItem {
                    batch: batch.clone(),
                },
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_imports_purchase_export() {
        let downloads = MockDownloads::new();
        downloads
            .insert("https://blobs/a.json", fixtures::purchase_export(&["PO-1", "PO-2"]))
            .await;
        let (store, handler) = setup(&downloads);
        let batch = submit_blob(store.as_ref(), "blob", Some("acme"), "https://blobs/a.json").unwrap();

        process(&handler, &batch).await.unwrap();

        let stored = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert!(stored.content_hash.is_some());
        let orders = store.list_orders(&batch.id).unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.status == ProcessingStatus::Completed));
        assert_eq!(store.list_purchase_items(&orders[0].id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sale_export_creates_sale_items() {
        let downloads = MockDownloads::new();
        let export = serde_json::json!({
            "kind": "sale",
            "orders": [{"reference": "S-1", "lines": [{"description": "Mug", "quantity": 3.0}]}]
        });
        downloads
            .insert("https://blobs/s.json", serde_json::to_vec(&export).unwrap())
            .await;
        let (store, handler) = setup(&downloads);
        let batch = submit_blob(store.as_ref(), "blob", None, "https://blobs/s.json").unwrap();

        process(&handler, &batch).await.unwrap();

        let orders = store.list_orders(&batch.id).unwrap();
        assert_eq!(store.list_sale_items(&orders[0].id).unwrap().len(), 1);
        assert!(store.list_purchase_items(&orders[0].id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_order_is_contained() {
        let downloads = MockDownloads::new();
        let export = serde_json::json!({
            "kind": "purchase",
            "orders": [
                {"reference": "PO-1"},
                {"reference": "PO-2", "lines": "not a list"},
                {"reference": "PO-3"}
            ]
        });
        downloads
            .insert("https://blobs/b.json", serde_json::to_vec(&export).unwrap())
            .await;
        let (store, handler) = setup(&downloads);
        let batch = submit_blob(store.as_ref(), "blob", None, "https://blobs/b.json").unwrap();

        process(&handler, &batch).await.unwrap();

        let orders = store.list_orders(&batch.id).unwrap();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[1].status, ProcessingStatus::Failed);
        assert!(orders[1].error_message.is_some());
        assert_eq!(
            store.get_batch(&batch.id).unwrap().unwrap().status,
            ProcessingStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_duplicate_content_is_skipped() {
        let downloads = MockDownloads::new();
        let content = fixtures::purchase_export(&["PO-1"]);
        downloads.insert("https://blobs/1.json", content.clone()).await;
        downloads.insert("https://blobs/2.json", content).await;
        let (store, handler) = setup(&downloads);

        let first = submit_blob(store.as_ref(), "blob", None, "https://blobs/1.json").unwrap();
        process(&handler, &first).await.unwrap();
        let second = submit_blob(store.as_ref(), "blob", None, "https://blobs/2.json").unwrap();
        process(&handler, &second).await.unwrap();

        let stored = store.get_batch(&second.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert!(stored
            .error_message
            .as_deref()
            .unwrap()
            .contains(&first.id));
        assert!(store.list_orders(&second.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_block_reimport() {
        let downloads = MockDownloads::new();
        downloads
            .insert("https://blobs/2.json", fixtures::purchase_export(&["PO-1"]))
            .await;
        let (store, handler) = setup(&downloads);

        // An earlier attempt at the same content failed part way
        let mut earlier = submit_blob(store.as_ref(), "blob", None, "https://blobs/1.json").unwrap();
        earlier.start(Utc::now()).unwrap();
        earlier.content_hash = Some(content_hash(&fixtures::purchase_export(&["PO-1"])));
        earlier.fail("cancelled", Utc::now()).unwrap();
        store.save_batch(&earlier).unwrap();

        let batch = submit_blob(store.as_ref(), "blob", None, "https://blobs/2.json").unwrap();
        process(&handler, &batch).await.unwrap();

        let stored = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert!(stored.error_message.is_none());
        assert_eq!(store.list_orders(&batch.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_content_is_partial() {
        let downloads = MockDownloads::new();
        downloads
            .insert("https://blobs/x.csv", b"ref,qty\nPO-1,2\n".to_vec())
            .await;
        let (store, handler) = setup(&downloads);
        let batch = submit_blob(store.as_ref(), "blob", None, "https://blobs/x.csv").unwrap();

        process(&handler, &batch).await.unwrap();

        let stored = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Partial);
        assert_eq!(stored.error_message.as_deref(), Some(NO_IMPORTER));
    }

    #[tokio::test]
    async fn test_download_failure_fails_batch() {
        let downloads = MockDownloads::new();
        let (store, handler) = setup(&downloads);
        let batch = submit_blob(store.as_ref(), "blob", None, "https://blobs/missing").unwrap();

        assert!(process(&handler, &batch).await.is_err());

        let stored = store.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert!(stored.error_message.as_deref().unwrap().contains("not found"));
    }
}
