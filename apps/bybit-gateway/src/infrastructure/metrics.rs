//! Gateway Metrics
//!
//! Recorded through the `metrics` facade; without an installed recorder the
//! calls are no-ops.
//!
//! - `gateway_requests_total{outcome}`: resolved REST requests
//! - `gateway_requests_in_flight`: requests admitted and not yet resolved
//! - `gateway_pending_events{kind}`: pushes and cancels waiting for a binding

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        "gateway_requests_total",
        "Total REST requests resolved, by outcome"
    );
    describe_gauge!(
        "gateway_requests_in_flight",
        "REST requests admitted by the engine and not yet resolved"
    );
    describe_gauge!(
        "gateway_pending_events",
        "Order events buffered until their exchange id is bound"
    );
}

/// Record a resolved request.
pub fn record_request(outcome: &'static str) {
    counter!("gateway_requests_total", "outcome" => outcome).increment(1);
}

/// Update the in-flight request gauge.
pub fn set_requests_in_flight(count: usize) {
    gauge!("gateway_requests_in_flight").set(count as f64);
}

/// Update the buffered event gauge for `kind` (`push` or `cancel`).
pub fn set_pending_events(kind: &'static str, count: usize) {
    gauge!("gateway_pending_events", "kind" => kind).set(count as f64);
}
