//! In-memory blob store for testing.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::RwLock;

use crate::handlers::{Download, DownloadError};

/// Serves configured bytes through a [`Download`] function.
///
/// Unknown URLs fail with [`DownloadError::NotFound`].
#[derive(Clone, Default)]
pub struct MockDownloads {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    requests: Arc<RwLock<Vec<String>>>,
}

impl MockDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.blobs.write().await.insert(url.to_string(), bytes);
    }

    pub async fn requests(&self) -> Vec<String> {
        self.requests.read().await.clone()
    }

    /// A [`Download`] reading from this store.
    pub fn download(&self) -> Download {
        let blobs = Arc::clone(&self.blobs);
        let requests = Arc::clone(&self.requests);
        Arc::new(move |url: String| {
            let blobs = Arc::clone(&blobs);
            let requests = Arc::clone(&requests);
            async move {
                requests.write().await.push(url.clone());
                blobs
                    .read()
                    .await
                    .get(&url)
                    .cloned()
                    .ok_or(DownloadError::NotFound(url))
            }
            .boxed()
        })
    }
}
