use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::scraper::ORDER_ID_PLACEHOLDER;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Engine poll interval and per-cycle limits are not 0
/// - Supplier ids are unique and detail templates carry the order placeholder
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Engine validation
    if config.engine.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "engine.poll_interval_ms cannot be 0".to_string(),
        ));
    }
    if config.engine.default_max_items_per_cycle == 0 {
        return Err(ConfigError::ValidationError(
            "engine.default_max_items_per_cycle cannot be 0".to_string(),
        ));
    }
    for (name, limits) in &config.engine.handlers {
        if limits.max_items_per_cycle == 0 {
            return Err(ConfigError::ValidationError(format!(
                "engine.handlers.{}.max_items_per_cycle cannot be 0",
                name
            )));
        }
    }

    // Supplier validation
    let mut seen = HashSet::new();
    for supplier in &config.suppliers {
        if !seen.insert(supplier.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate supplier id: {}",
                supplier.id
            )));
        }
        if !supplier.detail_path_template.contains(ORDER_ID_PLACEHOLDER) {
            return Err(ConfigError::ValidationError(format!(
                "suppliers.{}.detail_path_template must contain {}",
                supplier.id, ORDER_ID_PLACEHOLDER
            )));
        }
    }

    Ok(())
}
