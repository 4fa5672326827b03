//! Types shared by the scraper components.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::staging::{StagedLine, StagingError};

/// Errors that can occur while scraping a supplier site.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The replayed session is not authenticated.
    #[error("cookies rejected: {0}")]
    InvalidCookies(String),

    /// The cookie file itself could not be used.
    #[error("invalid cookie file: {0}")]
    InvalidCookieFile(String),

    /// Transport failure.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Timed out waiting for the supplier site.
    #[error("request to {0} timed out")]
    Timeout(String),

    /// Non-success response.
    #[error("{url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    /// Page content did not match the expected layout.
    #[error("parse error: {0}")]
    Parse(String),

    /// Supplier profile is misconfigured.
    #[error("invalid supplier profile: {0}")]
    Profile(String),

    /// Staging store error.
    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("scrape cancelled")]
    Cancelled,
}

/// Minimal order information read from the supplier's order list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    /// Supplier-assigned order reference.
    pub order_id: String,
    pub order_date: Option<NaiveDate>,
    pub total_cents: Option<i64>,
    /// Link to the detail page as found in the list, if any.
    pub detail_href: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl OrderSummary {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            ..Default::default()
        }
    }
}

/// Fields parsed from an order detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order_date: Option<NaiveDate>,
    pub total_cents: Option<i64>,
    pub currency: Option<String>,
    pub lines: Vec<StagedLine>,
    /// Everything captured from the page, kept verbatim on the staging row.
    pub raw: serde_json::Value,
}

/// A scrape request for one batch.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub cookie_file: super::CookieFile,
    /// Existing Pending batch to drive; a new batch is created when absent.
    pub batch_id: Option<String>,
}

/// Summary of a finished crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub batch_id: String,
    pub session_id: String,
    pub orders_seen: u32,
    pub orders_failed: u32,
}
