//! Injected blob/byte-stream access.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics;

/// Errors from a [`Download`] function.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("download of {0} timed out")]
    Timeout(String),

    #[error("download failed: {0}")]
    Request(String),
}

/// Fetch the bytes behind a URL.
pub type Download =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Vec<u8>, DownloadError>> + Send + Sync>;

/// Blob access configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    60
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

/// A [`Download`] backed by plain HTTP GETs.
pub fn http_download(config: &BlobConfig) -> Result<Download, DownloadError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| DownloadError::Request(e.to_string()))?;

    Ok(Arc::new(move |url: String| {
        let client = client.clone();
        async move {
            let started = Instant::now();
            let result = fetch_bytes(&client, &url).await;
            metrics::observe_external("blob", started.elapsed().as_secs_f64(), result.is_ok());
            result
        }
        .boxed()
    }))
}

async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>, DownloadError> {
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DownloadError::Timeout(url.to_string())
        } else {
            DownloadError::Request(e.to_string())
        }
    })?;

    let status = response.status();
    if status.as_u16() == 404 {
        return Err(DownloadError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(DownloadError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DownloadError::Request(e.to_string()))?;
    Ok(bytes.to_vec())
}
