//! Metrics for transport latency, strategy switching and order flow.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

use crate::transport::TransportVariant;

// === Metric Name Constants ===

/// Transport request latency metric name.
pub const METRIC_TRANSPORT_REQUEST_LATENCY: &str = "transport_request_latency_ms";
/// Venue operation latency metric name.
pub const METRIC_VENUE_OPERATION_LATENCY: &str = "venue_operation_latency_ms";
/// Strategy switch latency metric name.
pub const METRIC_SWITCH_LATENCY: &str = "strategy_switch_latency_ms";
/// Signing latency metric name.
pub const METRIC_SIGNING_LATENCY: &str = "signing_latency_ms";
/// Transport requests counter metric name.
pub const METRIC_TRANSPORT_REQUESTS: &str = "transport_requests_total";
/// Challenge pages counter metric name.
pub const METRIC_CHALLENGES_DETECTED: &str = "challenges_detected_total";
/// Strategy switches counter metric name.
pub const METRIC_STRATEGY_SWITCHES: &str = "strategy_switches_total";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_TRANSPORT_REQUEST_LATENCY,
        "Transport request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_VENUE_OPERATION_LATENCY,
        "Marketplace operation latency in milliseconds"
    );
    describe_histogram!(
        METRIC_SWITCH_LATENCY,
        "Time to tear down one transport and start another in milliseconds"
    );
    describe_histogram!(
        METRIC_SIGNING_LATENCY,
        "Cryptographic signing latency in milliseconds"
    );

    describe_counter!(
        METRIC_TRANSPORT_REQUESTS,
        "Total number of completed transport requests"
    );
    describe_counter!(
        METRIC_CHALLENGES_DETECTED,
        "Total number of anti-bot challenge pages seen"
    );
    describe_counter!(
        METRIC_STRATEGY_SWITCHES,
        "Total number of transport strategy switches"
    );
    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");

    debug!("Metrics initialized");
}

/// Record a completed transport request.
pub fn record_request(variant: TransportVariant, start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let variant = variant.to_string();
    histogram!(METRIC_TRANSPORT_REQUEST_LATENCY, "variant" => variant.clone()).record(latency_ms);
    counter!(METRIC_TRANSPORT_REQUESTS, "variant" => variant).increment(1);
}

/// Record marketplace operation latency.
pub fn record_venue_latency(start: Instant, operation: &'static str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_VENUE_OPERATION_LATENCY, "operation" => operation).record(latency_ms);
}

/// Increment challenge counter.
pub fn inc_challenges(variant: TransportVariant) {
    counter!(METRIC_CHALLENGES_DETECTED, "variant" => variant.to_string()).increment(1);
}

/// Record a strategy switch attempt.
pub fn record_switch(to: TransportVariant, succeeded: bool, start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_SWITCH_LATENCY).record(latency_ms);
    counter!(
        METRIC_STRATEGY_SWITCHES,
        "to" => to.to_string(),
        "outcome" => if succeeded { "ok" } else { "failed" }
    )
    .increment(1);
}

/// Increment order submitted counter.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for signing operations.
pub fn timer_signing() -> LatencyTimer {
    LatencyTimer::new(METRIC_SIGNING_LATENCY)
}
