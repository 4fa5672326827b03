//! Data-driven supplier strategy.
//!
//! A [`SupplierProfile`] describes a supplier site with URLs, an
//! authenticated-page marker and CSS selectors; [`ProfileStrategy`] turns it
//! into a [`SupplierStrategy`].

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::strategy::{detect_currency, parse_date, parse_money, parse_quantity};
use super::{OrderDetail, OrderSummary, ScrapeError, SupplierStrategy};
use crate::staging::StagedLine;

/// Placeholder substituted with the order reference in detail templates.
pub const ORDER_ID_PLACEHOLDER: &str = "{order_id}";

/// CSS selectors used to read supplier pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSelectors {
    /// One element per order on the list page.
    #[serde(default = "default_order_row")]
    pub order_row: String,
    /// Within a row: the order reference.
    #[serde(default = "default_order_id")]
    pub order_id: String,
    /// Read the reference from this attribute of the row instead of its text.
    #[serde(default)]
    pub order_id_attr: Option<String>,
    #[serde(default = "default_order_date")]
    pub order_date: String,
    #[serde(default = "default_order_total")]
    pub order_total: String,
    /// Within a row: a link to the detail page.
    #[serde(default)]
    pub detail_link: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default = "default_line_item")]
    pub line_item: String,
    #[serde(default = "default_line_sku")]
    pub line_sku: String,
    #[serde(default = "default_line_description")]
    pub line_description: String,
    #[serde(default = "default_line_quantity")]
    pub line_quantity: String,
    #[serde(default = "default_line_unit_price")]
    pub line_unit_price: String,
}

fn default_order_row() -> String {
    ".order-row".to_string()
}

fn default_order_id() -> String {
    ".order-id".to_string()
}

fn default_order_date() -> String {
    ".order-date".to_string()
}

fn default_order_total() -> String {
    ".order-total".to_string()
}

fn default_line_item() -> String {
    ".line-item".to_string()
}

fn default_line_sku() -> String {
    ".sku".to_string()
}

fn default_line_description() -> String {
    ".description".to_string()
}

fn default_line_quantity() -> String {
    ".quantity".to_string()
}

fn default_line_unit_price() -> String {
    ".unit-price".to_string()
}

impl Default for ProfileSelectors {
    fn default() -> Self {
        Self {
            order_row: default_order_row(),
            order_id: default_order_id(),
            order_id_attr: None,
            order_date: default_order_date(),
            order_total: default_order_total(),
            detail_link: None,
            currency: None,
            line_item: default_line_item(),
            line_sku: default_line_sku(),
            line_description: default_line_description(),
            line_quantity: default_line_quantity(),
            line_unit_price: default_line_unit_price(),
        }
    }
}

/// Configuration of one scrapeable supplier site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierProfile {
    /// Supplier identifier; also names the handler (`scrape:<id>`).
    pub id: String,
    /// Site root, e.g. `https://shop.example.com`.
    pub base_url: String,
    #[serde(default = "default_account_path")]
    pub account_path: String,
    #[serde(default = "default_orders_path")]
    pub orders_path: String,
    /// Detail path containing `{order_id}`.
    #[serde(default = "default_detail_template")]
    pub detail_path_template: String,
    /// Text that only appears on pages rendered for a signed-in user.
    pub authenticated_marker: String,
    #[serde(default)]
    pub selectors: ProfileSelectors,
}

fn default_account_path() -> String {
    "/account".to_string()
}

fn default_orders_path() -> String {
    "/account/orders".to_string()
}

fn default_detail_template() -> String {
    "/account/orders/{order_id}".to_string()
}

impl SupplierProfile {
    /// Profile with default paths and selectors.
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        authenticated_marker: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            account_path: default_account_path(),
            orders_path: default_orders_path(),
            detail_path_template: default_detail_template(),
            authenticated_marker: authenticated_marker.into(),
            selectors: ProfileSelectors::default(),
        }
    }

    /// Engine handler name for this supplier.
    pub fn handler_name(&self) -> String {
        format!("scrape:{}", self.id)
    }
}

struct CompiledSelectors {
    order_row: Selector,
    order_id: Selector,
    order_date: Selector,
    order_total: Selector,
    detail_link: Option<Selector>,
    currency: Option<Selector>,
    line_item: Selector,
    line_sku: Selector,
    line_description: Selector,
    line_quantity: Selector,
    line_unit_price: Selector,
}

fn compile(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Profile(format!("selector {:?}: {:?}", css, e)))
}

impl CompiledSelectors {
    fn new(selectors: &ProfileSelectors) -> Result<Self, ScrapeError> {
        Ok(Self {
            order_row: compile(&selectors.order_row)?,
            order_id: compile(&selectors.order_id)?,
            order_date: compile(&selectors.order_date)?,
            order_total: compile(&selectors.order_total)?,
            detail_link: selectors.detail_link.as_deref().map(compile).transpose()?,
            currency: selectors.currency.as_deref().map(compile).transpose()?,
            line_item: compile(&selectors.line_item)?,
            line_sku: compile(&selectors.line_sku)?,
            line_description: compile(&selectors.line_description)?,
            line_quantity: compile(&selectors.line_quantity)?,
            line_unit_price: compile(&selectors.line_unit_price)?,
        })
    }
}

/// Collapsed text of an element.
fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(text_of)
        .filter(|text| !text.is_empty())
}

/// [`SupplierStrategy`] driven by a [`SupplierProfile`].
pub struct ProfileStrategy {
    profile: SupplierProfile,
    base: Url,
    selectors: CompiledSelectors,
}

impl ProfileStrategy {
    /// Validate the profile and compile its selectors.
    pub fn new(profile: SupplierProfile) -> Result<Self, ScrapeError> {
        let base = Url::parse(&profile.base_url)
            .map_err(|e| ScrapeError::Profile(format!("base_url {}: {}", profile.base_url, e)))?;
        if !profile.detail_path_template.contains(ORDER_ID_PLACEHOLDER) {
            return Err(ScrapeError::Profile(format!(
                "detail_path_template must contain {}",
                ORDER_ID_PLACEHOLDER
            )));
        }
        let selectors = CompiledSelectors::new(&profile.selectors)?;
        Ok(Self {
            profile,
            base,
            selectors,
        })
    }

    pub fn profile(&self) -> &SupplierProfile {
        &self.profile
    }

    fn resolve(&self, path: &str) -> Result<String, ScrapeError> {
        self.base
            .join(path)
            .map(String::from)
            .map_err(|e| ScrapeError::Profile(format!("cannot resolve {}: {}", path, e)))
    }

    fn parse_line(&self, row: ElementRef<'_>) -> Option<StagedLine> {
        let description = first_text(row, &self.selectors.line_description)?;
        Some(StagedLine {
            sku: first_text(row, &self.selectors.line_sku),
            description,
            quantity: first_text(row, &self.selectors.line_quantity)
                .map(|q| parse_quantity(&q))
                .unwrap_or(1.0),
            unit_price_cents: first_text(row, &self.selectors.line_unit_price)
                .and_then(|p| parse_money(&p)),
        })
    }
}

impl SupplierStrategy for ProfileStrategy {
    fn supplier_id(&self) -> &str {
        &self.profile.id
    }

    fn base_url(&self) -> &str {
        &self.profile.base_url
    }

    fn account_url(&self) -> String {
        self.resolve(&self.profile.account_path)
            .unwrap_or_else(|_| self.profile.base_url.clone())
    }

    fn list_url(&self) -> String {
        self.resolve(&self.profile.orders_path)
            .unwrap_or_else(|_| self.profile.base_url.clone())
    }

    fn detail_url(&self, summary: &OrderSummary) -> Result<String, ScrapeError> {
        if let Some(href) = &summary.detail_href {
            return self.resolve(href);
        }
        let path = self
            .profile
            .detail_path_template
            .replace(ORDER_ID_PLACEHOLDER, &urlencoding::encode(&summary.order_id));
        self.resolve(&path)
    }

    fn validate_page(&self, html: &str) -> bool {
        html.contains(&self.profile.authenticated_marker)
    }

    fn parse_list(&self, html: &str) -> Result<Vec<OrderSummary>, ScrapeError> {
        let document = Html::parse_document(html);
        let mut summaries = Vec::new();

        for row in document.select(&self.selectors.order_row) {
            let order_id = match &self.profile.selectors.order_id_attr {
                Some(attr) => row.value().attr(attr).map(|v| v.trim().to_string()),
                None => first_text(row, &self.selectors.order_id),
            };
            let Some(order_id) = order_id.filter(|id| !id.is_empty()) else {
                continue;
            };

            let date_text = first_text(row, &self.selectors.order_date);
            let total_text = first_text(row, &self.selectors.order_total);
            let mut summary = OrderSummary::new(order_id);
            summary.order_date = date_text.as_deref().and_then(parse_date);
            summary.total_cents = total_text.as_deref().and_then(parse_money);
            summary.detail_href = self.selectors.detail_link.as_ref().and_then(|selector| {
                row.select(selector)
                    .next()
                    .and_then(|link| link.value().attr("href"))
                    .map(str::to_string)
            });
            if let Some(text) = date_text {
                summary.metadata.insert("date_text".to_string(), text);
            }
            if let Some(text) = total_text {
                summary.metadata.insert("total_text".to_string(), text);
            }
            summaries.push(summary);
        }

        Ok(summaries)
    }

    fn parse_detail(&self, html: &str, summary: &OrderSummary) -> Result<OrderDetail, ScrapeError> {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let lines: Vec<StagedLine> = document
            .select(&self.selectors.line_item)
            .filter_map(|row| self.parse_line(row))
            .collect();

        let date_text = first_text(root, &self.selectors.order_date);
        let total_text = first_text(root, &self.selectors.order_total);
        if lines.is_empty() && total_text.is_none() {
            return Err(ScrapeError::Parse(format!(
                "order {}: no line items or total on detail page",
                summary.order_id
            )));
        }

        let currency = self
            .selectors
            .currency
            .as_ref()
            .and_then(|selector| first_text(root, selector))
            .or_else(|| total_text.clone())
            .and_then(|text| detect_currency(&text));

        let raw = serde_json::json!({
            "order_id": summary.order_id,
            "list": summary.metadata,
            "date_text": date_text,
            "total_text": total_text,
            "lines": lines,
        });

        Ok(OrderDetail {
            order_date: date_text.as_deref().and_then(parse_date).or(summary.order_date),
            total_cents: total_text.as_deref().and_then(parse_money).or(summary.total_cents),
            currency,
            lines,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use chrono::NaiveDate;

    fn strategy() -> ProfileStrategy {
        ProfileStrategy::new(fixtures::supplier_profile("acme", "https://shop.acme.test")).unwrap()
    }

    #[test]
    fn test_urls() {
        let strategy = strategy();
        assert_eq!(strategy.account_url(), "https://shop.acme.test/account");
        assert_eq!(strategy.list_url(), "https://shop.acme.test/account/orders");
        assert_eq!(
            strategy.detail_url(&OrderSummary::new("PO 7")).unwrap(),
            "https://shop.acme.test/account/orders/PO%207"
        );

        let mut summary = OrderSummary::new("PO-1");
        summary.detail_href = Some("/orders/view?id=1".to_string());
        assert_eq!(
            strategy.detail_url(&summary).unwrap(),
            "https://shop.acme.test/orders/view?id=1"
        );
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let mut profile = fixtures::supplier_profile("acme", "https://shop.acme.test");
        profile.detail_path_template = "/orders".to_string();
        assert!(matches!(
            ProfileStrategy::new(profile),
            Err(ScrapeError::Profile(_))
        ));
    }

    #[test]
    fn test_bad_selector_rejected() {
        let mut profile = fixtures::supplier_profile("acme", "https://shop.acme.test");
        profile.selectors.order_row = "[[[".to_string();
        assert!(matches!(
            ProfileStrategy::new(profile),
            Err(ScrapeError::Profile(_))
        ));
    }

    #[test]
    fn test_validate_page() {
        let strategy = strategy();
        assert!(strategy.validate_page(&fixtures::account_page(true)));
        assert!(!strategy.validate_page(&fixtures::account_page(false)));
    }

    #[test]
    fn test_parse_list() {
        let strategy = strategy();
        let summaries = strategy
            .parse_list(&fixtures::order_list_page(&["PO-1", "PO-2", "PO-3"]))
            .unwrap();

        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].order_id, "PO-1");
        assert_eq!(summaries[2].order_id, "PO-3");
        assert_eq!(summaries[0].order_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(summaries[0].total_cents, Some(2_500));
    }

    #[test]
    fn test_parse_list_by_attribute() {
        let mut profile = fixtures::supplier_profile("acme", "https://shop.acme.test");
        profile.selectors.order_row = "li[data-order]".to_string();
        profile.selectors.order_id_attr = Some("data-order".to_string());
        let strategy = ProfileStrategy::new(profile).unwrap();

        let html = r#"<ul><li data-order="A1">one</li><li data-order="">skip</li><li data-order="A2">two</li></ul>"#;
        let ids: Vec<String> = strategy
            .parse_list(html)
            .unwrap()
            .into_iter()
            .map(|s| s.order_id)
            .collect();
        assert_eq!(ids, vec!["A1", "A2"]);
    }

    #[test]
    fn test_parse_detail() {
        let strategy = strategy();
        let summary = OrderSummary::new("PO-1");
        let detail = strategy
            .parse_detail(&fixtures::order_detail_page("PO-1"), &summary)
            .unwrap();

        assert_eq!(detail.lines.len(), 2);
        assert_eq!(detail.lines[0].sku.as_deref(), Some("SKU-1"));
        assert_eq!(detail.lines[0].quantity, 2.0);
        assert_eq!(detail.lines[0].unit_price_cents, Some(500));
        assert_eq!(detail.total_cents, Some(2_500));
        assert_eq!(detail.currency.as_deref(), Some("USD"));
        assert_eq!(detail.order_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(detail.raw["order_id"], "PO-1");
    }

    #[test]
    fn test_parse_detail_without_content_fails() {
        let strategy = strategy();
        let err = strategy
            .parse_detail("<html><body>Oops</body></html>", &OrderSummary::new("PO-2"))
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(_)));
    }
}
