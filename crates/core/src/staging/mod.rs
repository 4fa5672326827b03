//! Staging area for supplier data awaiting reconciliation.

mod hash;
mod intake;
mod sqlite_store;
mod store;
mod types;

pub use hash::content_hash;
pub use intake::{submit_blob, submit_cookie_file, Submission};
pub use sqlite_store::{SqliteStagingDatabase, SqliteStagingStore};
pub use store::{BatchFilter, StagingDatabase, StagingError, StagingStore};
pub use types::{
    BatchKind, CandidateLink, CandidateStatus, ProcessingStatus, ProductImage, ScrapeSession,
    ScrapeState, StagedLine, StagingBatch, StagingPurchaseOrder, StagingPurchaseOrderItem,
    StagingSaleItem,
};
