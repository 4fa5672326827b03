pub mod config;
pub mod engine;
pub mod handlers;
pub mod metrics;
pub mod scraper;
pub mod staging;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    SanitizedConfig, ServerConfig,
};
pub use engine::{
    CycleReport, EngineConfig, EngineError, EngineStatus, HandlerError, HandlerInfo,
    HandlerRegistry, HandlerRegistryBuilder, ProcessingEngine, Purpose, Truncation, WorkHandler,
    WorkItem,
};
pub use handlers::{
    http_download, BlobBatchHandler, BlobConfig, Download, DownloadError, EmbeddingConfig,
    EmbeddingError, EmbeddingGenerator, HttpEmbeddingGenerator, ImageEmbeddingHandler,
    ScrapeHandler, BLOB_HANDLER, IMAGE_EMBEDDING_HANDLER,
};
pub use scraper::{
    CookieFile, HttpPageFetcherFactory, PageFetcherFactory, ProfileStrategy, ScrapeError,
    ScrapeOrchestrator, ScraperConfig, SupplierProfile, SupplierStrategy,
};
pub use staging::{
    submit_blob, submit_cookie_file, BatchFilter, BatchKind, ProcessingStatus,
    SqliteStagingDatabase, StagingBatch, StagingDatabase, StagingError, StagingStore, Submission,
};
