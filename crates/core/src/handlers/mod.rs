//! Work handlers registered with the processing engine.
//!
//! - [`ScrapeHandler`]: one per supplier profile, runs cookie-authenticated scrapes
//! - [`BlobBatchHandler`]: imports uploaded order exports
//! - [`ImageEmbeddingHandler`]: fills in missing product image embeddings

mod blob;
mod download;
mod embedding;
mod scrape;

pub use blob::{BlobBatchHandler, BlobBatchItem, NO_IMPORTER};
pub use download::{http_download, BlobConfig, Download, DownloadError};
pub use embedding::{
    EmbeddingConfig, EmbeddingError, EmbeddingGenerator, HttpEmbeddingGenerator,
    ImageEmbeddingHandler, ImageWorkItem,
};
pub use scrape::{ScrapeBatchItem, ScrapeHandler};

/// Handler name used for blob batches.
pub const BLOB_HANDLER: &str = "blob";

/// Handler name used for image embeddings.
pub const IMAGE_EMBEDDING_HANDLER: &str = "image_embedding";
