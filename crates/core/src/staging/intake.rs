//! Submission operations that create Pending batches for the handlers to pick up.

use tracing::info;

use super::{BatchKind, StagingBatch, StagingError, StagingStore};
use crate::scraper::CookieFile;

/// Outcome of submitting a source snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// A new Pending batch was created.
    Accepted(StagingBatch),
    /// An identical snapshot is pending in, or was ingested by, this batch.
    Duplicate(String),
}

/// Stage a captured cookie file as a Pending web-scrape batch.
///
/// The batch carries the canonical payload so the scrape handler can replay it
/// later. Resubmitting byte-identical content returns the existing batch id,
/// unless that batch Failed; a failed snapshot can be submitted again.
pub fn submit_cookie_file(
    store: &dyn StagingStore,
    cookie_file: &CookieFile,
    processor_name: &str,
) -> Result<Submission, StagingError> {
    let payload = cookie_file
        .canonical_bytes()
        .map_err(|e| StagingError::InvalidValue(format!("cookie file: {}", e)))?;
    let hash = super::content_hash(&payload);

    let payload = String::from_utf8(payload)
        .map_err(|e| StagingError::InvalidValue(format!("cookie file: {}", e)))?;
    let batch = StagingBatch::new(BatchKind::WebScrape, processor_name)
        .with_supplier(cookie_file.supplier_id.clone())
        .with_content_hash(hash)
        .with_payload(payload);

    if let Some(existing) = store.insert_batch_unless_duplicate(&batch)? {
        info!(
            batch_id = %existing.id,
            status = %existing.status,
            supplier = %cookie_file.supplier_id,
            "Cookie file already submitted"
        );
        return Ok(Submission::Duplicate(existing.id));
    }

    info!(
        batch_id = %batch.id,
        supplier = %cookie_file.supplier_id,
        processor = %processor_name,
        "Accepted cookie file"
    );
    Ok(Submission::Accepted(batch))
}

/// Stage a blob reference as a Pending upload batch.
pub fn submit_blob(
    store: &dyn StagingStore,
    processor_name: &str,
    supplier_id: Option<&str>,
    blob_url: &str,
) -> Result<StagingBatch, StagingError> {
    if blob_url.trim().is_empty() {
        return Err(StagingError::InvalidValue("blob url is empty".to_string()));
    }

    let mut batch = StagingBatch::new(BatchKind::BlobUpload, processor_name).with_payload(blob_url);
    if let Some(supplier_id) = supplier_id {
        batch = batch.with_supplier(supplier_id);
    }
    store.insert_batch(&batch)?;

    info!(batch_id = %batch.id, processor = %processor_name, "Accepted blob upload");
    Ok(batch)
}
