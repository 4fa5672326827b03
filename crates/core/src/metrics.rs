//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Processing engine (cycles, dispatched items, outcomes, truncations)
//! - Scraper (sessions and orders by outcome)
//! - External services (blob downloads, embedding generation)

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Processing Engine
// =============================================================================

/// Engine cycles run.
pub static ENGINE_CYCLES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("stockyard_engine_cycles_total", "Total engine cycles run").unwrap()
});

/// Engine cycle duration in seconds.
pub static ENGINE_CYCLE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stockyard_engine_cycle_duration_seconds",
            "Duration of one fetch-then-process cycle",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
    )
    .unwrap()
});

/// Work items dispatched to processing, by handler.
pub static ITEMS_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stockyard_engine_items_dispatched_total",
            "Work items dispatched for processing",
        ),
        &["handler"],
    )
    .unwrap()
});

/// Work items processed, by handler and outcome.
pub static ITEMS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stockyard_engine_items_processed_total",
            "Work items processed",
        ),
        &["handler", "outcome"], // "success", "failure"
    )
    .unwrap()
});

/// Fetch results cut down to the handler's per-cycle limit.
pub static TRUNCATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stockyard_engine_truncations_total",
            "Fetch results truncated to the per-cycle limit",
        ),
        &["handler"],
    )
    .unwrap()
});

/// Handler fetch failures.
pub static FETCH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stockyard_engine_fetch_failures_total",
            "Handler work-source queries that failed",
        ),
        &["handler"],
    )
    .unwrap()
});

// =============================================================================
// Scraper
// =============================================================================

/// Scrape sessions by supplier and outcome.
pub static SCRAPE_SESSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stockyard_scrape_sessions_total", "Scrape sessions finished"),
        &["supplier", "outcome"], // "completed", "invalid_cookies", "failed", "cancelled"
    )
    .unwrap()
});

/// Scraped orders by supplier and outcome.
pub static SCRAPE_ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stockyard_scrape_orders_total", "Order detail pages processed"),
        &["supplier", "outcome"], // "completed", "failed"
    )
    .unwrap()
});

// =============================================================================
// External Services
// =============================================================================

/// External service call duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "stockyard_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service"], // "supplier_site", "blob", "embedding"
    )
    .unwrap()
});

/// External service requests by outcome.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stockyard_external_service_requests_total",
            "External service requests",
        ),
        &["service", "result"], // result: "success", "error"
    )
    .unwrap()
});

/// Record one external call.
pub fn observe_external(service: &str, seconds: f64, ok: bool) {
    EXTERNAL_SERVICE_DURATION
        .with_label_values(&[service])
        .observe(seconds);
    EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&[service, if ok { "success" } else { "error" }])
        .inc();
}

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Engine
        Box::new(ENGINE_CYCLES.clone()),
        Box::new(ENGINE_CYCLE_DURATION.clone()),
        Box::new(ITEMS_DISPATCHED.clone()),
        Box::new(ITEMS_PROCESSED.clone()),
        Box::new(TRUNCATIONS.clone()),
        Box::new(FETCH_FAILURES.clone()),
        // Scraper
        Box::new(SCRAPE_SESSIONS.clone()),
        Box::new(SCRAPE_ORDERS.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_once() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        ITEMS_DISPATCHED.with_label_values(&["unit-test"]).inc();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"stockyard_engine_items_dispatched_total".to_string()));
    }

    #[test]
    fn test_observe_external() {
        observe_external("blob", 0.2, false);
        let errors = EXTERNAL_SERVICE_REQUESTS
            .with_label_values(&["blob", "error"])
            .get();
        assert!(errors >= 1);
    }
}
