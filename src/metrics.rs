//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Pipeline requests (labels: category, method, status)
//! - `gateway_auth_failures_total` - Rejected credentials (label: reason)
//! - `gateway_rate_limited_total` - Requests rejected by admission control (label: identity kind)
//! - `gateway_credential_cache_events_total` - Cache hits, misses and invalidations (label: event)
//! - `gateway_analytics_records_total` - Background analytics outcomes (label: outcome)
//! - `gateway_circuit_breaker_opens_total` - Times the backend circuit opened
//! - `gateway_circuit_breaker_rejections_total` - Requests failed fast by the open circuit
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - Pipeline duration (labels: category, method, status)
//! - `gateway_backend_duration_seconds` - Forwarded backend call duration (label: outcome)
//!
//! ## Gauges
//! - `gateway_credential_cache_entries` - Identities currently cached
//! - `gateway_rate_limited_identities` - Identities holding a limiter bucket
//! - `gateway_circuit_breaker_state` - Backend circuit (0 = closed, 1 = half-open, 2 = open)
//!
//! # Usage
//!
//! ```rust,ignore
//! use search_gateway::metrics::{init_metrics, record_request};
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_request("search", "POST", 200, 0.045);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const CACHE_EVENTS_TOTAL: &str = "gateway_credential_cache_events_total";
    pub const CACHE_ENTRIES: &str = "gateway_credential_cache_entries";
    pub const RATE_LIMITED_IDENTITIES: &str = "gateway_rate_limited_identities";
    pub const ANALYTICS_RECORDS_TOTAL: &str = "gateway_analytics_records_total";
    pub const BACKEND_DURATION_SECONDS: &str = "gateway_backend_duration_seconds";
    pub const CIRCUIT_BREAKER_OPENS_TOTAL: &str = "gateway_circuit_breaker_opens_total";
    pub const CIRCUIT_BREAKER_REJECTIONS_TOTAL: &str = "gateway_circuit_breaker_rejections_total";
    pub const CIRCUIT_BREAKER_STATE: &str = "gateway_circuit_breaker_state";
}

/// Initialize the Prometheus metrics exporter.
///
/// Sets up metric descriptions and starts the Prometheus HTTP listener on
/// `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Total number of requests that entered a pipeline chain"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of rejected authentication attempts"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by per-identity admission control"
    );
    describe_counter!(
        names::CACHE_EVENTS_TOTAL,
        "Credential cache hits, misses and invalidations"
    );
    describe_counter!(
        names::ANALYTICS_RECORDS_TOTAL,
        "Outcomes of background analytics enrichment"
    );
    describe_counter!(
        names::CIRCUIT_BREAKER_OPENS_TOTAL,
        "Total number of times the backend circuit breaker opened"
    );
    describe_counter!(
        names::CIRCUIT_BREAKER_REJECTIONS_TOTAL,
        "Total number of requests rejected by the open backend circuit"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Pipeline request duration in seconds"
    );
    describe_histogram!(
        names::BACKEND_DURATION_SECONDS,
        "Forwarded search backend call duration in seconds"
    );

    describe_gauge!(
        names::CACHE_ENTRIES,
        "Number of identities held in the credential cache"
    );
    describe_gauge!(
        names::RATE_LIMITED_IDENTITIES,
        "Number of identities holding a rate limiter bucket"
    );
    describe_gauge!(
        names::CIRCUIT_BREAKER_STATE,
        "Backend circuit breaker state (0 = closed, 1 = half-open, 2 = open)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a request that went through a pipeline chain.
pub fn record_request(category: &str, method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(
        names::REQUESTS_TOTAL,
        "category" => category.to_string(),
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    histogram!(
        names::REQUEST_DURATION_SECONDS,
        "category" => category.to_string(),
        "method" => method.to_string(),
        "status" => status
    )
    .record(duration_secs);
}

/// Record a rejected authentication attempt.
pub fn record_auth_failure(reason: &str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record a request rejected by the per-identity limiter.
pub fn record_rate_limited(identity_kind: &str) {
    counter!(names::RATE_LIMITED_TOTAL, "kind" => identity_kind.to_string()).increment(1);
}

/// Record a credential cache event (`hit`, `miss`, `invalidate`).
pub fn record_cache_event(event: &str) {
    counter!(names::CACHE_EVENTS_TOTAL, "event" => event.to_string()).increment(1);
}

/// Record the outcome of one analytics enrichment task.
pub fn record_analytics(outcome: &str) {
    counter!(names::ANALYTICS_RECORDS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Record circuit breaker opening.
pub fn record_circuit_breaker_open() {
    counter!(names::CIRCUIT_BREAKER_OPENS_TOTAL).increment(1);
}

/// Record circuit breaker rejection.
pub fn record_circuit_breaker_rejection() {
    counter!(names::CIRCUIT_BREAKER_REJECTIONS_TOTAL).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record a forwarded backend call.
pub fn record_backend_duration(outcome: &str, duration_secs: f64) {
    histogram!(names::BACKEND_DURATION_SECONDS, "outcome" => outcome.to_string())
        .record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

pub fn set_cache_entries(count: usize) {
    gauge!(names::CACHE_ENTRIES).set(count as f64);
}

pub fn set_rate_limited_identities(count: usize) {
    gauge!(names::RATE_LIMITED_IDENTITIES).set(count as f64);
}

/// Update circuit breaker state gauge.
///
/// States: 0 = closed, 1 = half-open, 2 = open
pub fn set_circuit_breaker_state(state: u8) {
    gauge!(names::CIRCUIT_BREAKER_STATE).set(f64::from(state));
}
