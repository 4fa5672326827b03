//! Types for the processing engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Purpose;

/// Errors raised while configuring the engine.
///
/// Runtime faults (fetch and process failures) never surface as errors; they
/// are logged and counted in the [`CycleReport`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// A handler name was registered twice through the strict path.
    #[error("duplicate handler registration: {0}")]
    DuplicateRegistration(String),

    /// A handler was registered with a zero per-cycle limit.
    #[error("handler {0} must allow at least one item per cycle")]
    InvalidMaxItems(String),
}

/// Public view of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub name: String,
    /// Rust type name of the handler's work item.
    pub item_type: String,
    pub max_items_per_cycle: usize,
    pub purpose: Purpose,
}

/// A fetch result that exceeded the handler's per-cycle limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    pub handler: String,
    pub returned: usize,
    pub limit: usize,
}

/// What happened during one engine cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Items returned by all fetches, before truncation.
    pub fetched: usize,
    pub truncations: Vec<Truncation>,
    /// Items handed to processing tasks.
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Names of handlers whose fetch failed or panicked.
    pub fetch_failures: Vec<String>,
    /// The cycle stopped launching work because of cancellation.
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Current status of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Whether the hosting loop is running.
    pub running: bool,
    /// Cycles completed since start.
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub handlers: Vec<HandlerInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_status_default() {
        let status = EngineStatus::default();
        assert!(!status.running);
        assert_eq!(status.cycles, 0);
        assert!(status.last_report.is_none());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::DuplicateRegistration("blob".to_string());
        assert_eq!(err.to_string(), "duplicate handler registration: blob");

        let err = EngineError::InvalidMaxItems("scrape:acme".to_string());
        assert_eq!(
            err.to_string(),
            "handler scrape:acme must allow at least one item per cycle"
        );
    }

    #[test]
    fn test_report_serialization() {
        let report = CycleReport {
            fetched: 7,
            truncations: vec![Truncation {
                handler: "blob".to_string(),
                returned: 7,
                limit: 5,
            }],
            dispatched: 5,
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["truncations"][0]["returned"], 7);
        assert_eq!(json["dispatched"], 5);
    }
}
