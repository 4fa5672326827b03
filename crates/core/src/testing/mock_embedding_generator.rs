//! Mock embedding generator for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::handlers::{EmbeddingError, EmbeddingGenerator};

/// Returns a fixed vector for every image and records the inputs.
#[derive(Clone)]
pub struct MockEmbeddingGenerator {
    vector: Vec<f32>,
    inputs: Arc<RwLock<Vec<Vec<u8>>>>,
    fail: Arc<RwLock<Option<String>>>,
}

impl MockEmbeddingGenerator {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            inputs: Arc::new(RwLock::new(Vec::new())),
            fail: Arc::new(RwLock::new(None)),
        }
    }

    /// Make every following call fail with an API error.
    pub async fn set_failure(&self, message: &str) {
        *self.fail.write().await = Some(message.to_string());
    }

    pub async fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.read().await.clone()
    }
}

#[async_trait]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn model(&self) -> &str {
        "mock-embedding"
    }

    async fn generate(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        self.inputs.write().await.push(image.to_vec());
        if let Some(message) = self.fail.read().await.clone() {
            return Err(EmbeddingError::Api {
                status: 500,
                message,
            });
        }
        Ok(self.vector.clone())
    }
}
