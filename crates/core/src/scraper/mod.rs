//! Authenticated supplier scraping.
//!
//! A captured [`CookieFile`] is replayed against a supplier site described by
//! a [`SupplierStrategy`]; the [`ScrapeOrchestrator`] turns the site's order
//! pages into staging orders and items.

mod config;
mod cookies;
mod fetcher;
mod orchestrator;
mod profile;
mod strategy;
mod types;

pub use config::ScraperConfig;
pub use cookies::{CapturedCookie, CookieFile};
pub use fetcher::{HttpPageFetcher, HttpPageFetcherFactory, PageFetcher, PageFetcherFactory};
pub use orchestrator::ScrapeOrchestrator;
pub use profile::{ProfileSelectors, ProfileStrategy, SupplierProfile, ORDER_ID_PLACEHOLDER};
pub use strategy::{detect_currency, parse_date, parse_money, parse_quantity, SupplierStrategy};
pub use types::{OrderDetail, OrderSummary, ScrapeError, ScrapeOutcome, ScrapeRequest};
