//! Common test utilities for API testing with mocks.
//!
//! The fixture builds the real router over a temporary staging database,
//! with every outbound service replaced by a core mock. The engine is built
//! but not started; tests drive it one cycle at a time.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use stockyard_core::{
    testing::{MockDownloads, MockEmbeddingGenerator, MockPageFetcher},
    Config, CycleReport, DatabaseConfig, EmbeddingConfig, EmbeddingGenerator, ProcessingEngine,
    SqliteStagingDatabase, StagingDatabase, StagingStore,
};
use stockyard_server::{
    api::create_router,
    state::AppState,
    wiring::{build_registry, Services},
};

/// Re-export fixtures for test convenience
pub use stockyard_core::testing::fixtures;

/// Base URL of the single configured supplier.
pub const ACME_BASE: &str = "https://shop.acme.test";

/// Test fixture for API testing with mock dependencies.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Engine wired to the same database as the router
    pub engine: Arc<ProcessingEngine>,
    /// Store session for direct assertions
    pub store: Arc<dyn StagingStore>,
    /// Mock supplier site
    pub fetcher: MockPageFetcher,
    /// Mock blob storage
    pub downloads: MockDownloads,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture with supplier "acme" and no embedding service.
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Create a fixture with an embedding service configured.
    pub async fn with_embeddings() -> Self {
        Self::build(true).await
    }

    async fn build(embeddings: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config {
            database: DatabaseConfig { path: db_path },
            suppliers: vec![fixtures::supplier_profile("acme", ACME_BASE)],
            ..Default::default()
        };
        config.engine.enabled = false;
        config.scraper.request_delay_ms = 0;
        if embeddings {
            config.embedding = Some(EmbeddingConfig {
                url: "http://embeddings.test/v1/embed".to_string(),
                model: "mock-embedding".to_string(),
                api_key: Some("super-secret-key".to_string()),
                timeout_secs: 5,
            });
        }

        let database: Arc<dyn StagingDatabase> = Arc::new(
            SqliteStagingDatabase::new(&config.database.path)
                .expect("Failed to open staging database"),
        );
        let store = database.open_session().expect("Failed to open session");

        let fetcher = MockPageFetcher::new();
        let downloads = MockDownloads::new();
        let services = Services {
            fetchers: Arc::new(fetcher.clone()),
            download: downloads.download(),
            embeddings: embeddings.then(|| {
                Arc::new(MockEmbeddingGenerator::new(vec![0.25, 0.5]))
                    as Arc<dyn EmbeddingGenerator>
            }),
        };

        let registry =
            build_registry(&config, &database, &services).expect("Failed to build registry");
        let engine = Arc::new(ProcessingEngine::new(registry, config.engine.clone()));

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&store),
            Arc::clone(&engine),
        ));
        let router = create_router(state);

        Self {
            router,
            engine,
            store,
            fetcher,
            downloads,
            temp_dir,
        }
    }

    /// Run one engine cycle to completion.
    pub async fn run_cycle(&self) -> CycleReport {
        self.engine.run_cycle(&CancellationToken::new()).await
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Fetch a path and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
