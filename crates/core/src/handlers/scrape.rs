//! Engine handler that runs supplier scrapes for Pending web-scrape batches.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{HandlerError, WorkHandler, WorkItem};
use crate::scraper::{
    CookieFile, PageFetcherFactory, ScrapeOrchestrator, ScrapeRequest, ScraperConfig,
    SupplierStrategy,
};
use crate::staging::{
    BatchFilter, BatchKind, ProcessingStatus, StagingBatch, StagingDatabase, StagingStore,
};

/// A Pending web-scrape batch.
#[derive(Debug, Clone)]
pub struct ScrapeBatchItem {
    pub batch: StagingBatch,
}

impl WorkItem for ScrapeBatchItem {
    fn id(&self) -> String {
        self.batch.id.clone()
    }
}

/// Scrapes one supplier. Each instance owns its own store session.
pub struct ScrapeHandler {
    supplier_id: String,
    store: Arc<dyn StagingStore>,
    orchestrator: ScrapeOrchestrator,
}

impl ScrapeHandler {
    pub fn new(
        store: Arc<dyn StagingStore>,
        strategy: Arc<dyn SupplierStrategy>,
        fetchers: Arc<dyn PageFetcherFactory>,
        config: &ScraperConfig,
    ) -> Self {
        Self {
            supplier_id: strategy.supplier_id().to_string(),
            orchestrator: ScrapeOrchestrator::new(strategy, fetchers, Arc::clone(&store), config),
            store,
        }
    }

    /// Factory building handlers on fresh store sessions.
    pub fn factory(
        database: Arc<dyn StagingDatabase>,
        strategy: Arc<dyn SupplierStrategy>,
        fetchers: Arc<dyn PageFetcherFactory>,
        config: ScraperConfig,
    ) -> impl Fn() -> Result<ScrapeHandler, HandlerError> + Send + Sync + 'static {
        move || {
            let store = database.open_session()?;
            Ok(ScrapeHandler::new(
                store,
                Arc::clone(&strategy),
                Arc::clone(&fetchers),
                &config,
            ))
        }
    }

    /// Record a batch whose payload cannot be replayed.
    fn reject_batch(&self, mut batch: StagingBatch, message: String) -> HandlerError {
        let now = Utc::now();
        let result = batch
            .start(now)
            .and_then(|_| batch.fail(message.clone(), now))
            .and_then(|_| self.store.save_batch(&batch));
        match result {
            Ok(()) => HandlerError::Other(message),
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl WorkHandler for ScrapeHandler {
    type Item = ScrapeBatchItem;

    async fn fetch_work_items(
        &self,
        max_items: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeBatchItem>, HandlerError> {
        let filter = BatchFilter::new()
            .with_status(ProcessingStatus::Pending)
            .with_kind(BatchKind::WebScrape)
            .with_supplier(self.supplier_id.clone())
            .with_limit(max_items as i64);

        Ok(self
            .store
            .list_batches(&filter)?
            .into_iter()
            .map(|batch| ScrapeBatchItem { batch })
            .collect())
    }

    async fn process(
        &self,
        item: ScrapeBatchItem,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let batch = item.batch;
        let payload = batch.raw_payload.clone().unwrap_or_default();
        let cookie_file = match CookieFile::from_json(&payload) {
            Ok(cookie_file) => cookie_file,
            Err(e) => return Err(self.reject_batch(batch, e.to_string())),
        };

        let outcome = self
            .orchestrator
            .run(
                ScrapeRequest {
                    cookie_file,
                    batch_id: Some(batch.id.clone()),
                },
                cancel,
            )
            .await?;

        info!(
            batch_id = %outcome.batch_id,
            supplier = %self.supplier_id,
            orders = outcome.orders_seen,
            failed = outcome.orders_failed,
            "Scrape batch processed"
        );
        Ok(())
    }
}
