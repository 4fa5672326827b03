use std::sync::Arc;

use stockyard_core::{
    Config, ProcessingEngine, SanitizedConfig, StagingStore, SupplierProfile,
};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn StagingStore>,
    engine: Arc<ProcessingEngine>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn StagingStore>, engine: Arc<ProcessingEngine>) -> Self {
        Self {
            config,
            store,
            engine,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    /// Store session used by request handlers.
    pub fn store(&self) -> &dyn StagingStore {
        self.store.as_ref()
    }

    pub fn engine(&self) -> &ProcessingEngine {
        self.engine.as_ref()
    }

    /// Configured supplier profile by id.
    pub fn supplier(&self, id: &str) -> Option<&SupplierProfile> {
        self.config.suppliers.iter().find(|s| s.id == id)
    }
}
