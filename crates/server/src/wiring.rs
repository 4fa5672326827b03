//! Builds the engine's handler registry from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use stockyard_core::{
    http_download, BlobBatchHandler, Config, Download, EmbeddingGenerator, HandlerRegistry,
    HttpEmbeddingGenerator, HttpPageFetcherFactory, ImageEmbeddingHandler, PageFetcherFactory,
    ProfileStrategy, Purpose, ScrapeHandler, StagingDatabase, BLOB_HANDLER,
    IMAGE_EMBEDDING_HANDLER,
};

/// External services the handlers are built on.
pub struct Services {
    pub fetchers: Arc<dyn PageFetcherFactory>,
    pub download: Download,
    /// Image embeddings are skipped when unset.
    pub embeddings: Option<Arc<dyn EmbeddingGenerator>>,
}

impl Services {
    /// Real HTTP-backed services.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetchers: Arc<dyn PageFetcherFactory> =
            Arc::new(HttpPageFetcherFactory::new(config.scraper.clone()));
        let download = http_download(&config.blob).context("Failed to create blob client")?;

        let embeddings: Option<Arc<dyn EmbeddingGenerator>> = match &config.embedding {
            Some(embedding) => {
                info!("Initializing embedding client at {}", embedding.url);
                Some(Arc::new(
                    HttpEmbeddingGenerator::new(embedding)
                        .context("Failed to create embedding client")?,
                ))
            }
            None => {
                info!("No embedding service configured");
                None
            }
        };

        Ok(Self {
            fetchers,
            download,
            embeddings,
        })
    }
}

/// Register one scrape handler per supplier profile, the blob handler and,
/// when configured, the image embedding handler.
pub fn build_registry(
    config: &Config,
    database: &Arc<dyn StagingDatabase>,
    services: &Services,
) -> Result<HandlerRegistry> {
    let mut builder = HandlerRegistry::builder();

    for profile in &config.suppliers {
        let name = profile.handler_name();
        let strategy = ProfileStrategy::new(profile.clone())
            .with_context(|| format!("Invalid supplier profile {}", profile.id))?;
        builder.try_register(
            name.clone(),
            config.engine.max_items_for(&name),
            Purpose::Ingestion,
            ScrapeHandler::factory(
                Arc::clone(database),
                Arc::new(strategy),
                Arc::clone(&services.fetchers),
                config.scraper.clone(),
            ),
        )?;
        info!(handler = %name, base_url = %profile.base_url, "Registered scrape handler");
    }

    builder.try_register(
        BLOB_HANDLER,
        config.engine.max_items_for(BLOB_HANDLER),
        Purpose::Ingestion,
        BlobBatchHandler::factory(Arc::clone(database), Arc::clone(&services.download)),
    )?;

    if let Some(generator) = &services.embeddings {
        builder.try_register(
            IMAGE_EMBEDDING_HANDLER,
            config.engine.max_items_for(IMAGE_EMBEDDING_HANDLER),
            Purpose::Internal,
            ImageEmbeddingHandler::factory(
                Arc::clone(database),
                Arc::clone(&services.download),
                Arc::clone(generator),
            ),
        )?;
    }

    builder.build().context("Invalid handler registration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_core::testing::{fixtures, MockDownloads, MockEmbeddingGenerator, MockPageFetcher};
    use stockyard_core::SqliteStagingDatabase;

    fn services(embeddings: bool) -> Services {
        Services {
            fetchers: Arc::new(MockPageFetcher::new()),
            download: MockDownloads::new().download(),
            embeddings: embeddings.then(|| {
                Arc::new(MockEmbeddingGenerator::new(vec![0.1])) as Arc<dyn EmbeddingGenerator>
            }),
        }
    }

    fn database() -> Arc<dyn StagingDatabase> {
        Arc::new(SqliteStagingDatabase::in_memory().unwrap())
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = Config {
            suppliers: vec![
                fixtures::supplier_profile("acme", "https://shop.acme.test"),
                fixtures::supplier_profile("globex", "https://globex.test"),
            ],
            ..Default::default()
        };
        config.engine.handlers.insert(
            "scrape:acme".to_string(),
            stockyard_core::engine::HandlerLimits {
                max_items_per_cycle: 2,
            },
        );

        let registry = build_registry(&config, &database(), &services(true)).unwrap();

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get("scrape:acme").unwrap().max_items_per_cycle, 2);
        assert_eq!(registry.get("scrape:globex").unwrap().max_items_per_cycle, 10);
        assert_eq!(
            registry.get(IMAGE_EMBEDDING_HANDLER).unwrap().purpose,
            Purpose::Internal
        );
    }

    #[test]
    fn test_embedding_handler_needs_service() {
        let registry = build_registry(&Config::default(), &database(), &services(false)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(BLOB_HANDLER).is_some());
    }

    #[test]
    fn test_duplicate_supplier_is_rejected() {
        let config = Config {
            suppliers: vec![
                fixtures::supplier_profile("acme", "https://shop.acme.test"),
                fixtures::supplier_profile("acme", "https://shop.acme.test"),
            ],
            ..Default::default()
        };
        assert!(build_registry(&config, &database(), &services(false)).is_err());
    }
}
