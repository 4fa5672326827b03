//! Supplier-specific scraping behavior.

use chrono::NaiveDate;
use regex_lite::Regex;

use super::{OrderDetail, OrderSummary, ScrapeError};

/// Everything the orchestrator needs to know about one supplier site.
///
/// Implementations are pure: they build URLs and read HTML, the orchestrator
/// does all I/O and status bookkeeping.
pub trait SupplierStrategy: Send + Sync {
    fn supplier_id(&self) -> &str;

    /// Site root; cookies are replayed against its host.
    fn base_url(&self) -> &str;

    /// A page that only renders for an authenticated session.
    fn account_url(&self) -> String;

    fn list_url(&self) -> String;

    fn detail_url(&self, summary: &OrderSummary) -> Result<String, ScrapeError>;

    /// Whether `html` shows an authenticated session.
    fn validate_page(&self, html: &str) -> bool;

    fn parse_list(&self, html: &str) -> Result<Vec<OrderSummary>, ScrapeError>;

    fn parse_detail(&self, html: &str, summary: &OrderSummary) -> Result<OrderDetail, ScrapeError>;
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];

/// Parse a date in one of the layouts suppliers commonly print.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Parse a printed amount like `$1,234.50` or `-12.5` into cents.
pub fn parse_money(text: &str) -> Option<i64> {
    let re = Regex::new(r"-?\d[\d,]*(?:\.\d+)?").ok()?;
    let number = re.find(text)?.as_str().replace(',', "");
    let negative = number.starts_with('-');
    let digits = number.trim_start_matches('-');

    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };
    let whole: i64 = whole.parse().ok()?;
    let fraction: String = fraction.chars().chain("00".chars()).take(2).collect();
    let fraction: i64 = fraction.parse().ok()?;

    let cents = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -cents } else { cents })
}

/// Parse a printed quantity, defaulting to 1 when nothing numeric is present.
pub fn parse_quantity(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().unwrap_or(1.0)
}

/// Find an ISO currency code in printed text.
pub fn detect_currency(text: &str) -> Option<String> {
    if let Ok(re) = Regex::new(r"\b[A-Z]{3}\b") {
        if let Some(code) = re.find(text) {
            return Some(code.as_str().to_string());
        }
    }
    match text.trim().chars().next()? {
        '$' => Some("USD".to_string()),
        '€' => Some("EUR".to_string()),
        '£' => Some("GBP".to_string()),
        _ => None,
    }
}
