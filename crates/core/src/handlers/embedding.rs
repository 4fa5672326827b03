//! Image embedding generation for canonical product images.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Download, DownloadError};
use crate::engine::{HandlerError, WorkHandler, WorkItem};
use crate::metrics;
use crate::staging::{ProductImage, StagingDatabase, StagingStore};

/// Error type for embedding operations.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("empty embedding returned")]
    Empty,

    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Turns image bytes into an embedding vector.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Model name recorded next to generated vectors.
    fn model(&self) -> &str;

    async fn generate(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError>;
}

/// Embedding service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Endpoint accepting `{"model", "image"}` JSON posts.
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

// ============================================================================
// HTTP Implementation
// ============================================================================

/// Embedding client for a JSON-over-HTTP embedding service.
pub struct HttpEmbeddingGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbeddingGenerator {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn request(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            image: base64::engine::general_purpose::STANDARD.encode(image),
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api { status, message });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Json(e.to_string()))?;

        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(parsed.embedding)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    image: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingGenerator for HttpEmbeddingGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let started = Instant::now();
        let result = self.request(image).await;
        metrics::observe_external("embedding", started.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}

// ============================================================================
// Engine Handler
// ============================================================================

/// A product image without an embedding.
#[derive(Debug, Clone)]
pub struct ImageWorkItem {
    pub image: ProductImage,
}

impl WorkItem for ImageWorkItem {
    fn id(&self) -> String {
        self.image.id.clone()
    }
}

/// Fills in missing image embeddings.
pub struct ImageEmbeddingHandler {
    store: Arc<dyn StagingStore>,
    download: Download,
    generator: Arc<dyn EmbeddingGenerator>,
}

impl ImageEmbeddingHandler {
    pub fn new(
        store: Arc<dyn StagingStore>,
        download: Download,
        generator: Arc<dyn EmbeddingGenerator>,
    ) -> Self {
        Self {
            store,
            download,
            generator,
        }
    }

    /// Factory building handlers on fresh store sessions.
    pub fn factory(
        database: Arc<dyn StagingDatabase>,
        download: Download,
        generator: Arc<dyn EmbeddingGenerator>,
    ) -> impl Fn() -> Result<ImageEmbeddingHandler, HandlerError> + Send + Sync + 'static {
        move || {
            Ok(ImageEmbeddingHandler::new(
                database.open_session()?,
                Arc::clone(&download),
                Arc::clone(&generator),
            ))
        }
    }

    async fn embed(&self, url: String) -> Result<Vec<f32>, EmbeddingError> {
        let bytes = (self.download)(url).await?;
        self.generator.generate(&bytes).await
    }
}

#[async_trait]
impl WorkHandler for ImageEmbeddingHandler {
    type Item = ImageWorkItem;

    async fn fetch_work_items(
        &self,
        max_items: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ImageWorkItem>, HandlerError> {
        Ok(self
            .store
            .list_images_missing_embedding(max_items as i64)?
            .into_iter()
            .map(|image| ImageWorkItem { image })
            .collect())
    }

    async fn process(
        &self,
        item: ImageWorkItem,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let mut image = item.image;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
            result = self.embed(image.image_url.clone()) => result,
        };

        match result {
            Ok(vector) => {
                debug!(image_id = %image.id, dimensions = vector.len(), "Generated embedding");
                image.set_embedding(vector, self.generator.model());
                self.store.save_image(&image)?;
                Ok(())
            }
            Err(e) => {
                warn!(image_id = %image.id, error = %e, "Embedding generation failed");
                image.record_failure(e.to_string());
                self.store.save_image(&image)?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::SqliteStagingDatabase;
    use crate::testing::{MockDownloads, MockEmbeddingGenerator};

    fn setup(
        downloads: &MockDownloads,
        generator: &MockEmbeddingGenerator,
    ) -> (Arc<dyn StagingStore>, ImageEmbeddingHandler) {
        let db: Arc<dyn StagingDatabase> = Arc::new(SqliteStagingDatabase::in_memory().unwrap());
        let store = db.open_session().unwrap();
        let handler = ImageEmbeddingHandler::factory(
            db,
            downloads.download(),
            Arc::new(generator.clone()),
        )()
        .unwrap();
        (store, handler)
    }

    #[tokio::test]
    async fn test_fetch_lists_missing_embeddings() {
        let downloads = MockDownloads::new();
        let generator = MockEmbeddingGenerator::new(vec![0.5, 0.25]);
        let (store, handler) = setup(&downloads, &generator);
        for i in 0..3 {
            store
                .insert_image(&ProductImage::new("p-1", format!("https://img/{}.png", i)))
                .unwrap();
        }

        let items = handler
            .fetch_work_items(2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_process_stores_embedding() {
        let downloads = MockDownloads::new();
        downloads.insert("https://img/a.png", vec![1, 2, 3]).await;
        let generator = MockEmbeddingGenerator::new(vec![0.5, 0.25]);
        let (store, handler) = setup(&downloads, &generator);
        let image = ProductImage::new("p-1", "https://img/a.png");
        store.insert_image(&image).unwrap();

        handler
            .process(ImageWorkItem { image: image.clone() }, &CancellationToken::new())
            .await
            .unwrap();

        let stored = store.get_image(&image.id).unwrap().unwrap();
        assert_eq!(stored.embedding, Some(vec![0.5, 0.25]));
        assert_eq!(stored.embedding_model.as_deref(), Some("mock-embedding"));
        assert_eq!(generator.inputs().await, vec![vec![1, 2, 3]]);
        assert!(store.list_images_missing_embedding(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let downloads = MockDownloads::new();
        let generator = MockEmbeddingGenerator::new(vec![0.5]);
        let (store, handler) = setup(&downloads, &generator);
        let image = ProductImage::new("p-1", "https://img/missing.png");
        store.insert_image(&image).unwrap();

        let result = handler
            .process(ImageWorkItem { image: image.clone() }, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(HandlerError::Embedding(_))));

        let stored = store.get_image(&image.id).unwrap().unwrap();
        assert!(stored.embedding.is_none());
        assert!(stored.error_message.is_some());
    }

    #[test]
    fn test_config_defaults() {
        let config: EmbeddingConfig =
            serde_json::from_str(r#"{"url": "http://localhost:9000/embed", "model": "clip"}"#)
                .unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert!(config.api_key.is_none());
        assert!(HttpEmbeddingGenerator::new(&config).is_ok());
    }
}
