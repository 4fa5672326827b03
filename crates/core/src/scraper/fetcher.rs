//! Page fetching with a replayed cookie session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use tracing::debug;

use super::{CookieFile, ScrapeError, ScraperConfig};
use crate::metrics;

/// Fetches HTML pages for one authenticated session.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError>;
}

/// Builds a [`PageFetcher`] that replays a cookie file against a site.
pub trait PageFetcherFactory: Send + Sync {
    fn for_cookies(
        &self,
        cookie_file: &CookieFile,
        base_url: &str,
    ) -> Result<Arc<dyn PageFetcher>, ScrapeError>;
}

/// reqwest-backed fetcher.
pub struct HttpPageFetcher {
    client: Client,
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        let started = Instant::now();
        let result = self.get(url).await;
        metrics::observe_external("supplier_site", started.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}

impl HttpPageFetcher {
    async fn get(&self, url: &str) -> Result<String, ScrapeError> {
        debug!(url = %url, "Fetching supplier page");
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout(url.to_string())
            } else {
                ScrapeError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| ScrapeError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Builds [`HttpPageFetcher`]s from the scraper configuration.
#[derive(Debug, Clone)]
pub struct HttpPageFetcherFactory {
    config: ScraperConfig,
}

impl HttpPageFetcherFactory {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

impl PageFetcherFactory for HttpPageFetcherFactory {
    fn for_cookies(
        &self,
        cookie_file: &CookieFile,
        base_url: &str,
    ) -> Result<Arc<dyn PageFetcher>, ScrapeError> {
        let origin = Url::parse(base_url)
            .map_err(|e| ScrapeError::Profile(format!("base_url {}: {}", base_url, e)))?;
        let jar = cookie_file.to_jar(&origin, Utc::now())?;

        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .user_agent(&self.config.user_agent)
            .cookie_provider(Arc::new(jar))
            .build()
            .map_err(|e| ScrapeError::Request {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Arc::new(HttpPageFetcher { client }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_factory_builds_fetcher_for_matching_domain() {
        let factory = HttpPageFetcherFactory::new(ScraperConfig::default());
        let cookie_file = fixtures::cookie_file("acme", "shop.acme.test");
        assert!(factory
            .for_cookies(&cookie_file, "https://shop.acme.test")
            .is_ok());
    }

    #[test]
    fn test_factory_rejects_foreign_site() {
        let factory = HttpPageFetcherFactory::new(ScraperConfig::default());
        let cookie_file = fixtures::cookie_file("acme", "shop.acme.test");
        let result = factory.for_cookies(&cookie_file, "https://other.test");
        assert!(matches!(result, Err(ScrapeError::InvalidCookieFile(_))));
    }
}
