//! Scrape orchestrator.
//!
//! Drives one supplier crawl through its states:
//! `Created -> ValidatingCookies -> CrawlingList -> CrawlingDetails -> Completed`,
//! or `Failed` from any step before the per-order loop. Orders are visited
//! strictly one at a time, each persisted before its detail page is requested.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    OrderDetail, OrderSummary, PageFetcher, PageFetcherFactory, ScrapeError, ScrapeOutcome,
    ScrapeRequest, ScraperConfig, SupplierStrategy,
};
use crate::metrics;
use crate::staging::{
    BatchKind, ScrapeSession, ScrapeState, StagingBatch, StagingError, StagingPurchaseOrder,
    StagingPurchaseOrderItem, StagingStore,
};

/// Runs authenticated crawls for one supplier.
pub struct ScrapeOrchestrator {
    strategy: Arc<dyn SupplierStrategy>,
    fetchers: Arc<dyn PageFetcherFactory>,
    store: Arc<dyn StagingStore>,
    request_delay: Duration,
}

/// The batch and session of a crawl in progress.
struct Run {
    batch: StagingBatch,
    session: ScrapeSession,
}

impl ScrapeOrchestrator {
    pub fn new(
        strategy: Arc<dyn SupplierStrategy>,
        fetchers: Arc<dyn PageFetcherFactory>,
        store: Arc<dyn StagingStore>,
        config: &ScraperConfig,
    ) -> Self {
        Self {
            strategy,
            fetchers,
            store,
            request_delay: Duration::from_millis(config.request_delay_ms),
        }
    }

    pub fn supplier_id(&self) -> &str {
        self.strategy.supplier_id()
    }

    /// Crawl the supplier's orders into staging.
    ///
    /// Returns an error only when the crawl could not get to the order loop
    /// (invalid cookies, list page failure) or was cancelled; in both cases
    /// the batch and session are already persisted as Failed. Individual
    /// order failures are recorded on the order rows.
    pub async fn run(
        &self,
        request: ScrapeRequest,
        cancel: &CancellationToken,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let supplier = self.strategy.supplier_id().to_string();
        let mut run = self.begin(&request)?;

        info!(
            batch_id = %run.batch.id,
            session_id = %run.session.id,
            supplier = %supplier,
            "Scrape session started"
        );

        let (fetcher, summaries) = match self.prepare(&mut run, &request, cancel).await {
            Ok(prepared) => prepared,
            Err((error, outcome)) => {
                let message = match &error {
                    ScrapeError::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                self.fail(&mut run, &message, outcome)?;
                return Err(error);
            }
        };

        self.advance(&mut run, ScrapeState::CrawlingDetails)?;
        for summary in summaries {
            match self.scrape_order(&mut run, fetcher.as_ref(), &summary, cancel).await {
                Ok(()) => {}
                Err(ScrapeError::Cancelled) => {
                    self.fail(&mut run, "cancelled", "cancelled")?;
                    return Err(ScrapeError::Cancelled);
                }
                Err(e) => {
                    self.fail(&mut run, &e.to_string(), "failed")?;
                    return Err(e);
                }
            }
        }

        let now = Utc::now();
        run.session.complete(now)?;
        run.batch.complete(now)?;
        self.store.save_session(&run.session)?;
        self.store.save_batch(&run.batch)?;
        metrics::SCRAPE_SESSIONS
            .with_label_values(&[supplier.as_str(), "completed"])
            .inc();

        info!(
            batch_id = %run.batch.id,
            supplier = %supplier,
            orders_seen = run.session.orders_seen,
            orders_failed = run.session.orders_failed,
            "Scrape session completed"
        );

        Ok(ScrapeOutcome {
            batch_id: run.batch.id,
            session_id: run.session.id,
            orders_seen: run.session.orders_seen,
            orders_failed: run.session.orders_failed,
        })
    }

    /// Persist the Started batch and session before any network I/O.
    fn begin(&self, request: &ScrapeRequest) -> Result<Run, ScrapeError> {
        let now = Utc::now();
        let supplier = self.strategy.supplier_id();

        let mut batch = match &request.batch_id {
            Some(id) => self
                .store
                .get_batch(id)?
                .ok_or_else(|| StagingError::NotFound {
                    entity: "batch",
                    id: id.clone(),
                })?,
            None => {
                let payload = request
                    .cookie_file
                    .canonical_bytes()
                    .map_err(|e| ScrapeError::InvalidCookieFile(e.to_string()))?;
                StagingBatch::new(BatchKind::WebScrape, format!("scrape:{}", supplier))
                    .with_supplier(supplier)
                    .with_content_hash(crate::staging::content_hash(&payload))
                    .with_payload(String::from_utf8_lossy(&payload).into_owned())
            }
        };

        if batch.kind != BatchKind::WebScrape {
            return Err(StagingError::InvalidValue(format!(
                "batch {} is a {} batch",
                batch.id, batch.kind
            ))
            .into());
        }

        batch.start(now)?;
        let session = ScrapeSession::started(&batch.id, supplier, &request.cookie_file.id, now);
        self.store.begin_scrape(&batch, &session)?;
        Ok(Run { batch, session })
    }

    /// Validate the cookie session and read the order list.
    async fn prepare(
        &self,
        run: &mut Run,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> Result<(Arc<dyn PageFetcher>, Vec<OrderSummary>), (ScrapeError, &'static str)> {
        let staging = |e: StagingError| (ScrapeError::from(e), "failed");
        let invalid = |e: ScrapeError| {
            let outcome = if matches!(e, ScrapeError::Cancelled) {
                "cancelled"
            } else {
                "invalid_cookies"
            };
            (e, outcome)
        };

        self.advance(run, ScrapeState::ValidatingCookies)
            .map_err(staging)?;
        let fetcher = self.validate_cookies(request, cancel).await.map_err(invalid)?;

        self.advance(run, ScrapeState::CrawlingList).map_err(staging)?;
        let list_url = self.strategy.list_url();
        let list_failed = |e: ScrapeError| {
            let outcome = if matches!(e, ScrapeError::Cancelled) {
                "cancelled"
            } else {
                "failed"
            };
            (e, outcome)
        };
        let page = fetch_page(fetcher.as_ref(), &list_url, cancel)
            .await
            .map_err(list_failed)?;
        let summaries = self.strategy.parse_list(&page).map_err(list_failed)?;

        info!(
            batch_id = %run.batch.id,
            orders = summaries.len(),
            "Order list parsed"
        );
        Ok((fetcher, summaries))
    }

    async fn validate_cookies(
        &self,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn PageFetcher>, ScrapeError> {
        let cookie_file = &request.cookie_file;
        if cookie_file.supplier_id != self.strategy.supplier_id() {
            return Err(ScrapeError::InvalidCookies(format!(
                "cookie file belongs to supplier {}",
                cookie_file.supplier_id
            )));
        }
        if cookie_file.is_expired(Utc::now()) {
            return Err(ScrapeError::InvalidCookies(format!(
                "cookie file {} has expired",
                cookie_file.id
            )));
        }

        let fetcher = self
            .fetchers
            .for_cookies(cookie_file, self.strategy.base_url())?;

        let account_url = self.strategy.account_url();
        let page = fetch_page(fetcher.as_ref(), &account_url, cancel).await?;
        if !self.strategy.validate_page(&page) {
            return Err(ScrapeError::InvalidCookies(format!(
                "{} did not render an authenticated page",
                account_url
            )));
        }
        Ok(fetcher)
    }

    /// Stage one order. Only cancellation and store failures escape.
    async fn scrape_order(
        &self,
        run: &mut Run,
        fetcher: &dyn PageFetcher,
        summary: &OrderSummary,
        cancel: &CancellationToken,
    ) -> Result<(), ScrapeError> {
        let detail_url = self.strategy.detail_url(summary);

        let mut order = StagingPurchaseOrder::new(&run.batch.id, &summary.order_id);
        order.order_date = summary.order_date;
        order.total_cents = summary.total_cents;
        order.raw_data = serde_json::to_value(summary).ok();
        order.start(Utc::now())?;
        self.store.insert_order(&order)?;

        run.session.orders_seen += 1;
        self.store.save_session(&run.session)?;

        let result = match detail_url {
            Ok(url) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
                    _ = tokio::time::sleep(self.request_delay) => {
                        self.fetch_detail(fetcher, &url, summary, cancel).await
                    }
                }
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(detail) => self.stage_detail(&mut order, detail),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                metrics::SCRAPE_ORDERS
                    .with_label_values(&[self.strategy.supplier_id(), "completed"])
                    .inc();
                Ok(())
            }
            Err(ScrapeError::Cancelled) => {
                order.fail("cancelled", Utc::now())?;
                self.store.save_order(&order)?;
                Err(ScrapeError::Cancelled)
            }
            Err(e) => {
                warn!(
                    batch_id = %run.batch.id,
                    order = %summary.order_id,
                    error = %e,
                    "Order scrape failed"
                );
                order.fail(e.to_string(), Utc::now())?;
                self.store.save_order(&order)?;
                run.session.orders_failed += 1;
                self.store.save_session(&run.session)?;
                metrics::SCRAPE_ORDERS
                    .with_label_values(&[self.strategy.supplier_id(), "failed"])
                    .inc();
                Ok(())
            }
        }
    }

    async fn fetch_detail(
        &self,
        fetcher: &dyn PageFetcher,
        url: &str,
        summary: &OrderSummary,
        cancel: &CancellationToken,
    ) -> Result<OrderDetail, ScrapeError> {
        let page = fetch_page(fetcher, url, cancel).await?;
        self.strategy.parse_detail(&page, summary)
    }

    /// Write parsed fields and line items, then complete the order.
    fn stage_detail(
        &self,
        order: &mut StagingPurchaseOrder,
        detail: OrderDetail,
    ) -> Result<(), ScrapeError> {
        order.order_date = detail.order_date.or(order.order_date);
        order.total_cents = detail.total_cents.or(order.total_cents);
        order.currency = detail.currency;
        order.raw_data = Some(detail.raw);

        for line in detail.lines {
            let item = StagingPurchaseOrderItem::new(&order.id, line);
            self.store.insert_purchase_item(&item)?;
        }

        let mut completed = order.clone();
        completed.complete(Utc::now())?;
        self.store.save_order(&completed)?;
        *order = completed;
        Ok(())
    }

    fn advance(&self, run: &mut Run, state: ScrapeState) -> Result<(), StagingError> {
        info!(
            session_id = %run.session.id,
            supplier = %self.strategy.supplier_id(),
            from = %run.session.state,
            to = %state,
            "Scrape state transition"
        );
        run.session.advance(state);
        self.store.save_session(&run.session)
    }

    fn fail(&self, run: &mut Run, message: &str, outcome: &str) -> Result<(), ScrapeError> {
        let now = Utc::now();
        warn!(
            batch_id = %run.batch.id,
            session_id = %run.session.id,
            supplier = %self.strategy.supplier_id(),
            error = %message,
            "Scrape session failed"
        );
        run.session.fail(message, now)?;
        run.batch.fail(message, now)?;
        self.store.save_session(&run.session)?;
        self.store.save_batch(&run.batch)?;
        metrics::SCRAPE_SESSIONS
            .with_label_values(&[self.strategy.supplier_id(), outcome])
            .inc();
        Ok(())
    }
}

async fn fetch_page(
    fetcher: &dyn PageFetcher,
    url: &str,
    cancel: &CancellationToken,
) -> Result<String, ScrapeError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
        page = fetcher.fetch(url) => page,
    }
}
