//! Engine configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-handler scheduling limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerLimits {
    /// Upper bound on items taken from this handler in one cycle.
    pub max_items_per_cycle: usize,
}

/// Configuration for the processing engine and its hosting loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Enable/disable the hosting loop.
    /// When disabled, submissions are accepted but never processed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Wait between the end of one cycle and the start of the next (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-cycle limit for handlers without an explicit entry.
    #[serde(default = "default_max_items")]
    pub default_max_items_per_cycle: usize,

    /// Overrides keyed by handler name.
    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerLimits>,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_max_items() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval(),
            default_max_items_per_cycle: default_max_items(),
            handlers: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Per-cycle limit for the named handler.
    pub fn max_items_for(&self, handler: &str) -> usize {
        self.handlers
            .get(handler)
            .map(|limits| limits.max_items_per_cycle)
            .unwrap_or(self.default_max_items_per_cycle)
    }
}
