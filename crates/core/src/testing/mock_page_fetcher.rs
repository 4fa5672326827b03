//! Mock supplier site for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::scraper::{CookieFile, PageFetcher, PageFetcherFactory, ScrapeError};

#[derive(Default)]
struct SiteState {
    pages: RwLock<HashMap<String, String>>,
    failures: RwLock<HashMap<String, u16>>,
    requests: RwLock<Vec<String>>,
    cookie_files: Mutex<Vec<String>>,
}

/// Mock implementation of the PageFetcher and PageFetcherFactory traits.
///
/// Serves configured HTML by exact URL. Unknown URLs answer HTTP 404.
/// Clones share state, so one instance can be handed to the code under test
/// and another kept for assertions.
///
/// # Example
///
/// ```rust,ignore
/// use stockyard_core::testing::{fixtures, MockPageFetcher};
///
/// let fetcher = MockPageFetcher::new();
/// fixtures::mount_supplier_site(&fetcher, "https://shop.acme.test", &["PO-1"]).await;
/// fetcher.fail_url("https://shop.acme.test/account/orders/PO-1", 500).await;
///
/// // Run a scrape...
///
/// assert_eq!(fetcher.requests().await.len(), 3);
/// ```
#[derive(Clone, Default)]
pub struct MockPageFetcher {
    state: Arc<SiteState>,
}

impl std::fmt::Debug for MockPageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPageFetcher")
            .field("state", &"<site>")
            .finish()
    }
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` at `url`.
    pub async fn set_page(&self, url: &str, html: &str) {
        self.state
            .pages
            .write()
            .await
            .insert(url.to_string(), html.to_string());
    }

    /// Answer `url` with an HTTP error status.
    pub async fn fail_url(&self, url: &str, status: u16) {
        self.state
            .failures
            .write()
            .await
            .insert(url.to_string(), status);
    }

    /// Stop failing `url`; its page, if any, is served again.
    pub async fn restore_url(&self, url: &str) {
        self.state.failures.write().await.remove(url);
    }

    /// URLs fetched so far, in order.
    pub async fn requests(&self) -> Vec<String> {
        self.state.requests.read().await.clone()
    }

    /// Ids of the cookie files sessions were opened with.
    pub async fn cookie_files_used(&self) -> Vec<String> {
        self.state
            .cookie_files
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageFetcher for MockPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        self.state.requests.write().await.push(url.to_string());

        if let Some(status) = self.state.failures.read().await.get(url) {
            return Err(ScrapeError::Http {
                url: url.to_string(),
                status: *status,
            });
        }

        self.state
            .pages
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| ScrapeError::Http {
                url: url.to_string(),
                status: 404,
            })
    }
}

impl PageFetcherFactory for MockPageFetcher {
    fn for_cookies(
        &self,
        cookie_file: &CookieFile,
        _base_url: &str,
    ) -> Result<Arc<dyn PageFetcher>, ScrapeError> {
        if let Ok(mut ids) = self.state.cookie_files.lock() {
            ids.push(cookie_file.id.clone());
        }
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_configured_pages() {
        let fetcher = MockPageFetcher::new();
        fetcher.set_page("https://a.test/", "<p>hi</p>").await;
        fetcher.fail_url("https://a.test/down", 503).await;

        assert_eq!(fetcher.fetch("https://a.test/").await.unwrap(), "<p>hi</p>");
        assert!(matches!(
            fetcher.fetch("https://a.test/down").await,
            Err(ScrapeError::Http { status: 503, .. })
        ));
        assert!(matches!(
            fetcher.fetch("https://a.test/missing").await,
            Err(ScrapeError::Http { status: 404, .. })
        ));
        assert_eq!(fetcher.requests().await.len(), 3);
    }
}
