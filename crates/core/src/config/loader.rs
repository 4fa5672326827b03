use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment overrides. Nested keys are joined with `__`, so
/// `STOCKYARD_ENGINE__POLL_INTERVAL_MS=500` sets `engine.poll_interval_ms`.
const ENV_PREFIX: &str = "STOCKYARD_";

/// Read the TOML file at `path`, then apply `STOCKYARD_*` overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    extract(
        Figment::from(Toml::file(path)).merge(Env::prefixed(ENV_PREFIX).split("__")),
    )
}

/// Parse TOML text without consulting the environment.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    extract(Figment::from(Toml::string(toml_str)))
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.suppliers.is_empty());
        assert!(config.embedding.is_none());
        assert_eq!(config.engine.max_items_for("blob"), 10);
    }

    #[test]
    fn test_handler_limits_keyed_by_handler_name() {
        let toml = r#"
[engine]
poll_interval_ms = 2000
default_max_items_per_cycle = 4

[engine.handlers."scrape:acme"]
max_items_per_cycle = 1
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.engine.poll_interval_ms, 2000);
        assert_eq!(config.engine.max_items_for("scrape:acme"), 1);
        assert_eq!(config.engine.max_items_for("blob"), 4);
    }

    #[test]
    fn test_wrong_port_type_is_parse_error() {
        let result = load_config_from_str("[server]\nport = \"eighty\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_missing_file_is_reported_by_path() {
        match load_config(Path::new("/nonexistent/stockyard.toml")) {
            Err(ConfigError::FileNotFound(path)) => assert!(path.contains("stockyard.toml")),
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_suppliers_and_embedding_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/var/lib/stockyard/staging.db"

[[suppliers]]
id = "acme"
base_url = "https://shop.acme.test"
authenticated_marker = "Sign out"

[embedding]
url = "http://embeddings.local/v1/embed"
model = "clip-small"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(
            config.database.path,
            Path::new("/var/lib/stockyard/staging.db")
        );
        assert_eq!(config.suppliers[0].handler_name(), "scrape:acme");
        let embedding = config.embedding.unwrap();
        assert_eq!(embedding.model, "clip-small");
        assert!(embedding.api_key.is_none());
    }
}
