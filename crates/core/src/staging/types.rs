//! Staging entities and their status lifecycles.
//!
//! Every entity owns its transition rules: callers mutate through the methods
//! below and then persist with the store's `save_*` operation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::StagingError;

/// Lifecycle state shared by batches, orders and scrape sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Queued,
    Started,
    Completed,
    Failed,
    /// Known to be structurally incomplete (an ingestion step is missing for
    /// this record), not merely "some items failed".
    Partial,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 6] = [
        ProcessingStatus::Pending,
        ProcessingStatus::Queued,
        ProcessingStatus::Started,
        ProcessingStatus::Completed,
        ProcessingStatus::Failed,
        ProcessingStatus::Partial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Started => "started",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Partial => "partial",
        }
    }

    /// Completed and Failed never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Whether `next` is a legal successor. Re-applying the current status is
    /// always allowed so that status writes stay idempotent.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Started)
                | (Pending, Failed)
                | (Queued, Started)
                | (Queued, Failed)
                | (Started, Completed)
                | (Started, Failed)
                | (Started, Partial)
                | (Partial, Queued)
                | (Partial, Started)
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StagingError::InvalidValue(format!("unknown processing status: {}", s)))
    }
}

/// Where a batch's raw data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    WebScrape,
    BlobUpload,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::WebScrape => "web_scrape",
            BatchKind::BlobUpload => "blob_upload",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchKind {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_scrape" => Ok(BatchKind::WebScrape),
            "blob_upload" => Ok(BatchKind::BlobUpload),
            other => Err(StagingError::InvalidValue(format!(
                "unknown batch kind: {}",
                other
            ))),
        }
    }
}

/// Applies a status change, enforcing the lifecycle.
///
/// Returns `true` when the status actually changed.
fn transition(
    entity: &'static str,
    id: &str,
    current: &mut ProcessingStatus,
    next: ProcessingStatus,
) -> Result<bool, StagingError> {
    if !current.can_transition_to(next) {
        return Err(StagingError::InvalidTransition {
            entity,
            id: id.to_string(),
            from: current.to_string(),
            to: next.to_string(),
        });
    }
    let changed = *current != next;
    *current = next;
    Ok(changed)
}

/// A unit of ingested raw supplier data awaiting promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingBatch {
    pub id: String,
    pub kind: BatchKind,
    /// Name of the handler that owns processing of this batch.
    pub processor_name: String,
    pub supplier_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Lowercase hex SHA-256 of the canonical input payload.
    pub content_hash: Option<String>,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub raw_payload: Option<String>,
}

impl StagingBatch {
    /// Create a new Pending batch (not yet persisted).
    pub fn new(kind: BatchKind, processor_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            processor_name: processor_name.into(),
            supplier_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            content_hash: None,
            status: ProcessingStatus::Pending,
            error_message: None,
            raw_payload: None,
        }
    }

    pub fn with_supplier(mut self, supplier_id: impl Into<String>) -> Self {
        self.supplier_id = Some(supplier_id.into());
        self
    }

    pub fn with_content_hash(mut self, content_hash: impl Into<String>) -> Self {
        self.content_hash = Some(content_hash.into());
        self
    }

    pub fn with_payload(mut self, raw_payload: impl Into<String>) -> Self {
        self.raw_payload = Some(raw_payload.into());
        self
    }

    pub fn queue(&mut self) -> Result<(), StagingError> {
        transition("batch", &self.id, &mut self.status, ProcessingStatus::Queued)?;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), StagingError> {
        if transition("batch", &self.id, &mut self.status, ProcessingStatus::Started)? {
            self.started_at = Some(now);
            self.completed_at = None;
            self.error_message = None;
        }
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), StagingError> {
        if transition("batch", &self.id, &mut self.status, ProcessingStatus::Completed)? {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), StagingError> {
        if transition("batch", &self.id, &mut self.status, ProcessingStatus::Failed)? {
            self.completed_at = Some(now);
            self.error_message = Some(message.into());
        }
        Ok(())
    }

    pub fn mark_partial(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StagingError> {
        if transition("batch", &self.id, &mut self.status, ProcessingStatus::Partial)? {
            self.completed_at = Some(now);
            self.error_message = Some(message.into());
        }
        Ok(())
    }
}

/// Intermediate representation of one scraped or imported order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingPurchaseOrder {
    pub id: String,
    pub batch_id: String,
    pub supplier_reference: String,
    pub order_date: Option<NaiveDate>,
    pub total_cents: Option<i64>,
    pub currency: Option<String>,
    pub raw_data: Option<serde_json::Value>,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    /// Canonical order this staging row was promoted to, if any.
    pub promoted_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StagingPurchaseOrder {
    /// Create a Pending order row knowing only its owner and reference.
    pub fn new(batch_id: impl Into<String>, supplier_reference: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            supplier_reference: supplier_reference.into(),
            order_date: None,
            total_cents: None,
            currency: None,
            raw_data: None,
            status: ProcessingStatus::Pending,
            error_message: None,
            promoted_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), StagingError> {
        if transition("order", &self.id, &mut self.status, ProcessingStatus::Started)? {
            self.updated_at = now;
        }
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), StagingError> {
        if transition("order", &self.id, &mut self.status, ProcessingStatus::Completed)? {
            self.error_message = None;
            self.updated_at = now;
        }
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), StagingError> {
        if transition("order", &self.id, &mut self.status, ProcessingStatus::Failed)? {
            self.error_message = Some(message.into());
            self.updated_at = now;
        }
        Ok(())
    }

    /// Record the canonical order this row was reconciled into.
    pub fn link_promoted(&mut self, canonical_order_id: impl Into<String>) -> Result<(), StagingError> {
        if self.status != ProcessingStatus::Completed {
            return Err(StagingError::InvalidTransition {
                entity: "order",
                id: self.id.clone(),
                from: self.status.to_string(),
                to: "promoted".to_string(),
            });
        }
        self.promoted_order_id = Some(canonical_order_id.into());
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Link state of a staging line relative to a canonical product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Linked,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Linked => "linked",
            CandidateStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for CandidateStatus {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CandidateStatus::Pending),
            "linked" => Ok(CandidateStatus::Linked),
            "rejected" => Ok(CandidateStatus::Rejected),
            other => Err(StagingError::InvalidValue(format!(
                "unknown candidate status: {}",
                other
            ))),
        }
    }
}

/// Candidate product link carried by purchase and sale lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLink {
    pub candidate_product_id: Option<String>,
    pub candidate_status: CandidateStatus,
}

impl Default for CandidateLink {
    fn default() -> Self {
        Self {
            candidate_product_id: None,
            candidate_status: CandidateStatus::Pending,
        }
    }
}

impl CandidateLink {
    fn rejected_error(&self, line_id: &str, to: &str) -> StagingError {
        StagingError::InvalidTransition {
            entity: "item",
            id: line_id.to_string(),
            from: self.candidate_status.as_str().to_string(),
            to: to.to_string(),
        }
    }

    /// Link (or relink) to a canonical product.
    pub fn link(&mut self, line_id: &str, product_id: impl Into<String>) -> Result<(), StagingError> {
        if self.candidate_status == CandidateStatus::Rejected {
            return Err(self.rejected_error(line_id, "linked"));
        }
        self.candidate_product_id = Some(product_id.into());
        self.candidate_status = CandidateStatus::Linked;
        Ok(())
    }

    /// Drop the product link and go back to Pending.
    pub fn unlink(&mut self, line_id: &str) -> Result<(), StagingError> {
        if self.candidate_status == CandidateStatus::Rejected {
            return Err(self.rejected_error(line_id, "pending"));
        }
        self.candidate_product_id = None;
        self.candidate_status = CandidateStatus::Pending;
        Ok(())
    }

    /// Terminal: this line will never be linked.
    pub fn reject(&mut self) {
        self.candidate_product_id = None;
        self.candidate_status = CandidateStatus::Rejected;
    }
}

/// A parsed order line, before it is attached to an order row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StagedLine {
    pub sku: Option<String>,
    pub description: String,
    pub quantity: f64,
    pub unit_price_cents: Option<i64>,
}

/// A purchase order line in staging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingPurchaseOrderItem {
    pub id: String,
    pub order_id: String,
    #[serde(flatten)]
    pub line: StagedLine,
    #[serde(flatten)]
    pub candidate: CandidateLink,
}

impl StagingPurchaseOrderItem {
    pub fn new(order_id: impl Into<String>, line: StagedLine) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            line,
            candidate: CandidateLink::default(),
        }
    }

    pub fn link_candidate(&mut self, product_id: impl Into<String>) -> Result<(), StagingError> {
        self.candidate.link(&self.id, product_id)
    }

    pub fn unlink_candidate(&mut self) -> Result<(), StagingError> {
        self.candidate.unlink(&self.id)
    }

    pub fn reject_candidate(&mut self) {
        self.candidate.reject();
    }
}

/// A sale line in staging; shares the candidate lifecycle of purchase lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingSaleItem {
    pub id: String,
    pub order_id: String,
    #[serde(flatten)]
    pub line: StagedLine,
    #[serde(flatten)]
    pub candidate: CandidateLink,
}

impl StagingSaleItem {
    pub fn new(order_id: impl Into<String>, line: StagedLine) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            line,
            candidate: CandidateLink::default(),
        }
    }

    pub fn link_candidate(&mut self, product_id: impl Into<String>) -> Result<(), StagingError> {
        self.candidate.link(&self.id, product_id)
    }

    pub fn unlink_candidate(&mut self) -> Result<(), StagingError> {
        self.candidate.unlink(&self.id)
    }

    pub fn reject_candidate(&mut self) {
        self.candidate.reject();
    }
}

/// Step of an authenticated crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeState {
    Created,
    ValidatingCookies,
    CrawlingList,
    CrawlingDetails,
    Completed,
    Failed,
}

impl ScrapeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeState::Created => "created",
            ScrapeState::ValidatingCookies => "validating_cookies",
            ScrapeState::CrawlingList => "crawling_list",
            ScrapeState::CrawlingDetails => "crawling_details",
            ScrapeState::Completed => "completed",
            ScrapeState::Failed => "failed",
        }
    }
}

impl fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrapeState {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ScrapeState::Created,
            ScrapeState::ValidatingCookies,
            ScrapeState::CrawlingList,
            ScrapeState::CrawlingDetails,
            ScrapeState::Completed,
            ScrapeState::Failed,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
        .ok_or_else(|| StagingError::InvalidValue(format!("unknown scrape state: {}", s)))
    }
}

/// Durable record of one crawl attempt against a supplier site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSession {
    pub id: String,
    pub batch_id: String,
    pub supplier_id: String,
    /// Identifier of the cookie file being replayed.
    pub cookie_file_id: String,
    pub state: ScrapeState,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub orders_seen: u32,
    pub orders_failed: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScrapeSession {
    /// A session that has just been started for `batch_id`.
    pub fn started(
        batch_id: impl Into<String>,
        supplier_id: impl Into<String>,
        cookie_file_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            supplier_id: supplier_id.into(),
            cookie_file_id: cookie_file_id.into(),
            state: ScrapeState::Created,
            status: ProcessingStatus::Started,
            error_message: None,
            orders_seen: 0,
            orders_failed: 0,
            started_at: now,
            completed_at: None,
        }
    }

    /// Move to a non-terminal crawl step.
    pub fn advance(&mut self, state: ScrapeState) {
        self.state = state;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), StagingError> {
        transition("session", &self.id, &mut self.status, ProcessingStatus::Completed)?;
        self.state = ScrapeState::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), StagingError> {
        transition("session", &self.id, &mut self.status, ProcessingStatus::Failed)?;
        self.state = ScrapeState::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }
}

/// A canonical product image that may need an embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: String,
    pub product_id: String,
    pub image_url: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProductImage {
    pub fn new(product_id: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            image_url: image_url.into(),
            embedding: None,
            embedding_model: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn set_embedding(&mut self, vector: Vec<f32>, model: impl Into<String>) {
        self.embedding = Some(vector);
        self.embedding_model = Some(model.into());
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }
}
