//! Scraper configuration.

use serde::{Deserialize, Serialize};

/// Politeness and transport settings shared by all supplier scrapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Wait before each order detail request (milliseconds).
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_request_delay() -> u64 {
    1500
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("stockyard/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}
