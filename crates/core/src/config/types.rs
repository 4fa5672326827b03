use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::engine::EngineConfig;
use crate::handlers::{BlobConfig, EmbeddingConfig};
use crate::scraper::{ScraperConfig, SupplierProfile};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    /// One scrape handler is registered per profile.
    #[serde(default)]
    pub suppliers: Vec<SupplierProfile>,
    #[serde(default)]
    pub blob: BlobConfig,
    /// Image embeddings are only generated when this section is present.
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stockyard.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub scraper: ScraperConfig,
    pub suppliers: Vec<SupplierProfile>,
    pub blob: BlobConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<SanitizedEmbeddingConfig>,
}

/// Sanitized embedding config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEmbeddingConfig {
    pub url: String,
    pub model: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            scraper: config.scraper.clone(),
            suppliers: config.suppliers.clone(),
            blob: config.blob.clone(),
            embedding: config.embedding.as_ref().map(|e| SanitizedEmbeddingConfig {
                url: e.url.clone(),
                model: e.model.clone(),
                api_key_configured: e.api_key.as_deref().is_some_and(|key| !key.is_empty()),
                timeout_secs: e.timeout_secs,
            }),
        }
    }
}
