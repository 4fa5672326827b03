//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external seams (supplier
//! sites, blob storage, embedding service) and of engine work handlers, so
//! ingestion can be exercised end to end without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use stockyard_core::testing::{fixtures, MockPageFetcher};
//!
//! let fetcher = MockPageFetcher::new();
//! fixtures::mount_supplier_site(&fetcher, "https://shop.acme.test", &["PO-1", "PO-2"]).await;
//!
//! // Hand `fetcher` to a ScrapeOrchestrator as its PageFetcherFactory...
//! ```

mod mock_downloads;
mod mock_embedding_generator;
mod mock_page_fetcher;
mod mock_work_handler;

pub use mock_downloads::MockDownloads;
pub use mock_embedding_generator::MockEmbeddingGenerator;
pub use mock_page_fetcher::MockPageFetcher;
pub use mock_work_handler::{MockItem, MockWorkHandler};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::MockPageFetcher;
    use crate::scraper::{CapturedCookie, CookieFile, SupplierProfile};

    /// Text rendered only for signed-in users on fixture pages.
    pub const SIGNED_IN_MARKER: &str = "Sign out";

    /// Create a cookie file with a single session cookie scoped to `domain`.
    pub fn cookie_file(supplier_id: &str, domain: &str) -> CookieFile {
        CookieFile {
            id: uuid::Uuid::new_v4().to_string(),
            supplier_id: supplier_id.to_string(),
            domain: domain.to_string(),
            captured_at: Utc::now(),
            expires_at: None,
            cookies: vec![CapturedCookie {
                name: "session".to_string(),
                value: "s3cr3t-session".to_string(),
                domain: None,
                path: None,
                secure: true,
                http_only: true,
                expires: None,
                same_site: Some("Lax".to_string()),
            }],
            metadata: BTreeMap::new(),
        }
    }

    /// Create a supplier profile with default paths and selectors.
    pub fn supplier_profile(id: &str, base_url: &str) -> SupplierProfile {
        SupplierProfile::new(id, base_url, SIGNED_IN_MARKER)
    }

    /// Account landing page, signed in or bounced to the login form.
    pub fn account_page(authenticated: bool) -> String {
        if authenticated {
            format!(
                "<html><body><h1>My account</h1><a href=\"/logout\">{}</a></body></html>",
                SIGNED_IN_MARKER
            )
        } else {
            "<html><body><form action=\"/login\"><button>Sign in</button></form></body></html>"
                .to_string()
        }
    }

    /// Order history page listing `order_ids`, each dated 2024-03-01 for $25.00.
    pub fn order_list_page(order_ids: &[&str]) -> String {
        let rows: String = order_ids
            .iter()
            .map(|id| {
                format!(
                    "<tr class=\"order-row\"><td class=\"order-id\">{}</td>\
                     <td class=\"order-date\">2024-03-01</td>\
                     <td class=\"order-total\">$25.00</td></tr>",
                    id
                )
            })
            .collect();
        format!(
            "<html><body><a href=\"/logout\">{}</a><table>{}</table></body></html>",
            SIGNED_IN_MARKER, rows
        )
    }

    /// Order detail page with two lines totalling $25.00 USD.
    pub fn order_detail_page(order_id: &str) -> String {
        format!(
            "<html><body>\
             <h1>Order {}</h1>\
             <span class=\"order-date\">2024-03-01</span>\
             <span class=\"order-total\">$25.00 USD</span>\
             <table>\
             <tr class=\"line-item\"><td class=\"sku\">SKU-1</td><td class=\"description\">Widget</td>\
             <td class=\"quantity\">2</td><td class=\"unit-price\">$5.00</td></tr>\
             <tr class=\"line-item\"><td class=\"sku\">SKU-2</td><td class=\"description\">Gadget</td>\
             <td class=\"quantity\">1</td><td class=\"unit-price\">$15.00</td></tr>\
             </table></body></html>",
            order_id
        )
    }

    /// Serve a signed-in account page, an order list and one detail page per order.
    pub async fn mount_supplier_site(fetcher: &MockPageFetcher, base_url: &str, order_ids: &[&str]) {
        fetcher
            .set_page(&format!("{}/account", base_url), &account_page(true))
            .await;
        fetcher
            .set_page(
                &format!("{}/account/orders", base_url),
                &order_list_page(order_ids),
            )
            .await;
        for id in order_ids {
            fetcher
                .set_page(
                    &format!("{}/account/orders/{}", base_url, id),
                    &order_detail_page(id),
                )
                .await;
        }
    }

    /// Purchase order export with one line per order.
    pub fn purchase_export(references: &[&str]) -> Vec<u8> {
        let orders: Vec<serde_json::Value> = references
            .iter()
            .map(|reference| {
                serde_json::json!({
                    "reference": reference,
                    "order_date": "2024-03-01",
                    "total_cents": 1000,
                    "currency": "USD",
                    "lines": [{
                        "sku": "SKU-1",
                        "description": "Widget",
                        "quantity": 2.0,
                        "unit_price_cents": 500
                    }]
                })
            })
            .collect();
        serde_json::json!({ "kind": "purchase", "orders": orders })
            .to_string()
            .into_bytes()
    }
}
