//! Ingestion lifecycle integration tests.
//!
//! These tests submit work the way the HTTP surface does and let the engine
//! pick it up: cookie files become scrape batches, blob URLs become import
//! batches, and every outcome is read back from an on-disk staging database.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use stockyard_core::{
    staging::{ScrapeState, SqliteStagingDatabase, StagingDatabase, StagingStore},
    submit_blob, submit_cookie_file,
    testing::{fixtures, MockDownloads, MockPageFetcher},
    BatchFilter, BlobBatchHandler, EngineConfig, HandlerRegistry, ProcessingEngine,
    ProcessingStatus, ProfileStrategy, Purpose, ScrapeHandler, ScraperConfig, Submission,
    BLOB_HANDLER,
};

const BASE: &str = "https://shop.acme.test";

/// Test helper wiring an engine to a temporary staging database.
struct TestHarness {
    database: Arc<dyn StagingDatabase>,
    store: Arc<dyn StagingStore>,
    fetcher: MockPageFetcher,
    downloads: MockDownloads,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let database: Arc<dyn StagingDatabase> = Arc::new(
            SqliteStagingDatabase::new(&temp_dir.path().join("staging.db"))
                .expect("Failed to open staging database"),
        );
        let store = database.open_session().expect("Failed to open session");

        Self {
            database,
            store,
            fetcher: MockPageFetcher::new(),
            downloads: MockDownloads::new(),
            _temp_dir: temp_dir,
        }
    }

    fn engine(&self) -> ProcessingEngine {
        let profile = fixtures::supplier_profile("acme", BASE);
        let handler_name = profile.handler_name();
        let strategy = ProfileStrategy::new(profile).expect("Invalid profile");
        let scraper = ScraperConfig {
            request_delay_ms: 0,
            ..Default::default()
        };

        let mut builder = HandlerRegistry::builder();
        builder
            .register(
                handler_name,
                5,
                Purpose::Ingestion,
                ScrapeHandler::factory(
                    Arc::clone(&self.database),
                    Arc::new(strategy),
                    Arc::new(self.fetcher.clone()),
                    scraper,
                ),
            )
            .register(
                BLOB_HANDLER,
                5,
                Purpose::Ingestion,
                BlobBatchHandler::factory(Arc::clone(&self.database), self.downloads.download()),
            );
        ProcessingEngine::new(builder.build().unwrap(), EngineConfig::default())
    }

    fn submit_cookies(&self) -> String {
        let cookie_file = fixtures::cookie_file("acme", "shop.acme.test");
        match submit_cookie_file(self.store.as_ref(), &cookie_file, "scrape:acme").unwrap() {
            Submission::Accepted(batch) => batch.id,
            other => panic!("Expected accepted submission, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_failed_order_is_contained() {
    let harness = TestHarness::new();
    fixtures::mount_supplier_site(&harness.fetcher, BASE, &["PO-1", "PO-2", "PO-3"]).await;
    harness
        .fetcher
        .fail_url(&format!("{}/account/orders/PO-2", BASE), 500)
        .await;
    let batch_id = harness.submit_cookies();

    let report = harness.engine().run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.succeeded, 1);

    let batch = harness.store.get_batch(&batch_id).unwrap().unwrap();
    assert_eq!(batch.status, ProcessingStatus::Completed);

    let orders = harness.store.list_orders(&batch_id).unwrap();
    let refs: Vec<&str> = orders.iter().map(|o| o.supplier_reference.as_str()).collect();
    assert_eq!(refs, vec!["PO-1", "PO-2", "PO-3"]);
    assert_eq!(orders[0].status, ProcessingStatus::Completed);
    assert_eq!(orders[1].status, ProcessingStatus::Failed);
    assert!(orders[1].error_message.as_deref().unwrap().contains("500"));
    assert_eq!(orders[2].status, ProcessingStatus::Completed);

    assert_eq!(harness.store.list_purchase_items(&orders[0].id).unwrap().len(), 2);
    assert!(harness.store.list_purchase_items(&orders[1].id).unwrap().is_empty());

    let sessions = harness.store.list_sessions(&batch_id).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, ScrapeState::Completed);
    assert_eq!(sessions[0].orders_seen, 3);
    assert_eq!(sessions[0].orders_failed, 1);
}

#[tokio::test]
async fn test_unauthenticated_session_fails_without_orders() {
    let harness = TestHarness::new();
    harness
        .fetcher
        .set_page(&format!("{}/account", BASE), &fixtures::account_page(false))
        .await;
    let batch_id = harness.submit_cookies();

    let report = harness.engine().run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.failed, 1);

    let batch = harness.store.get_batch(&batch_id).unwrap().unwrap();
    assert_eq!(batch.status, ProcessingStatus::Failed);
    assert!(batch.error_message.is_some());
    assert!(harness.store.list_orders(&batch_id).unwrap().is_empty());

    let session = &harness.store.list_sessions(&batch_id).unwrap()[0];
    assert_eq!(session.state, ScrapeState::Failed);
    assert_eq!(session.status, ProcessingStatus::Failed);
    assert!(session.error_message.is_some());

    // Only the account page was requested
    assert_eq!(harness.fetcher.requests().await, vec![format!("{}/account", BASE)]);
}

#[tokio::test]
async fn test_identical_cookie_file_is_deduplicated() {
    let harness = TestHarness::new();
    let cookie_file = fixtures::cookie_file("acme", "shop.acme.test");

    let first = submit_cookie_file(harness.store.as_ref(), &cookie_file, "scrape:acme").unwrap();
    let Submission::Accepted(batch) = first else {
        panic!("Expected accepted submission");
    };
    let second = submit_cookie_file(harness.store.as_ref(), &cookie_file, "scrape:acme").unwrap();
    assert_eq!(second, Submission::Duplicate(batch.id.clone()));

    let pending = harness
        .store
        .count_batches(&BatchFilter::new().with_status(ProcessingStatus::Pending))
        .unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn test_cookie_file_resubmitted_after_site_outage() {
    let harness = TestHarness::new();
    fixtures::mount_supplier_site(&harness.fetcher, BASE, &["PO-1"]).await;
    let account = format!("{}/account", BASE);
    harness.fetcher.fail_url(&account, 503).await;
    let cookie_file = fixtures::cookie_file("acme", "shop.acme.test");
    let engine = harness.engine();

    let Submission::Accepted(first) =
        submit_cookie_file(harness.store.as_ref(), &cookie_file, "scrape:acme").unwrap()
    else {
        panic!("Expected accepted submission");
    };
    engine.run_cycle(&CancellationToken::new()).await;
    let failed = harness.store.get_batch(&first.id).unwrap().unwrap();
    assert_eq!(failed.status, ProcessingStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap().contains("503"));

    // Same snapshot once the site is back
    harness.fetcher.restore_url(&account).await;
    let resubmitted =
        submit_cookie_file(harness.store.as_ref(), &cookie_file, "scrape:acme").unwrap();
    let Submission::Accepted(retry) = resubmitted else {
        panic!("Expected failed snapshot to be accepted, got {:?}", resubmitted);
    };

    let report = engine.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.succeeded, 1);
    let retry = harness.store.get_batch(&retry.id).unwrap().unwrap();
    assert_eq!(retry.status, ProcessingStatus::Completed);
    assert_eq!(harness.store.list_orders(&retry.id).unwrap().len(), 1);
    assert!(harness.store.list_orders(&first.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_completed_batches_are_not_picked_up_again() {
    let harness = TestHarness::new();
    fixtures::mount_supplier_site(&harness.fetcher, BASE, &["PO-1"]).await;
    harness.submit_cookies();
    let engine = harness.engine();

    let first = engine.run_cycle(&CancellationToken::new()).await;
    let second = engine.run_cycle(&CancellationToken::new()).await;

    assert_eq!(first.dispatched, 1);
    assert_eq!(second.dispatched, 0);
}

#[tokio::test]
async fn test_blob_and_scrape_batches_share_a_cycle() {
    let harness = TestHarness::new();
    fixtures::mount_supplier_site(&harness.fetcher, BASE, &["PO-1"]).await;
    harness
        .downloads
        .insert("https://blobs/export.json", fixtures::purchase_export(&["INV-1", "INV-2"]))
        .await;
    let scrape_id = harness.submit_cookies();
    let blob = submit_blob(
        harness.store.as_ref(),
        BLOB_HANDLER,
        Some("acme"),
        "https://blobs/export.json",
    )
    .unwrap();

    let report = harness.engine().run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded, 2);
    for id in [&scrape_id, &blob.id] {
        let batch = harness.store.get_batch(id).unwrap().unwrap();
        assert_eq!(batch.status, ProcessingStatus::Completed);
    }
    assert_eq!(harness.store.list_orders(&blob.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_deleting_a_batch_cascades() {
    let harness = TestHarness::new();
    fixtures::mount_supplier_site(&harness.fetcher, BASE, &["PO-1", "PO-2"]).await;
    let batch_id = harness.submit_cookies();
    harness.engine().run_cycle(&CancellationToken::new()).await;
    let orders = harness.store.list_orders(&batch_id).unwrap();
    assert_eq!(orders.len(), 2);

    assert!(harness.store.delete_batch(&batch_id).unwrap());

    assert!(harness.store.get_batch(&batch_id).unwrap().is_none());
    assert!(harness.store.list_orders(&batch_id).unwrap().is_empty());
    assert!(harness.store.list_sessions(&batch_id).unwrap().is_empty());
    assert!(harness
        .store
        .list_purchase_items(&orders[0].id)
        .unwrap()
        .is_empty());
}
