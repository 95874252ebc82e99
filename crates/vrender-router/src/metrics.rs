//! Prometheus-style metrics for the router.
//!
//! Recording is a no-op until a recorder is installed (the worker binary
//! installs the Prometheus exporter when configured).

use metrics::{counter, gauge, histogram};
use vrender_models::{FailureKind, FallbackAction, ProfileSource, Tier};

/// Metric names as constants for consistency.
pub mod names {
    // Routing metrics
    pub const ROUTING_DECISIONS_TOTAL: &str = "vrender_routing_decisions_total";
    pub const PROBE_FAILURES_TOTAL: &str = "vrender_probe_failures_total";

    // Rule engine metrics
    pub const RULE_EVALUATIONS_TOTAL: &str = "vrender_rule_evaluations_total";
    pub const RULE_CONSERVATIVE_DECISIONS_TOTAL: &str = "vrender_rule_conservative_decisions_total";

    // Dispatch metrics
    pub const BACKEND_ATTEMPTS_TOTAL: &str = "vrender_backend_attempts_total";
    pub const FALLBACKS_TOTAL: &str = "vrender_fallbacks_total";
    pub const PREPROCESSING_DURATION_SECONDS: &str = "vrender_preprocessing_duration_seconds";

    // Outcome metrics
    pub const REQUESTS_COMPLETED_TOTAL: &str = "vrender_requests_completed_total";
    pub const REQUESTS_FAILED_TOTAL: &str = "vrender_requests_failed_total";
    pub const REQUEST_DURATION_SECONDS: &str = "vrender_request_duration_seconds";
    pub const REQUEST_COST_USD: &str = "vrender_request_cost_usd";
    pub const REQUESTS_IN_FLIGHT: &str = "vrender_requests_in_flight";
    pub const DEDUP_JOINS_TOTAL: &str = "vrender_dedup_joins_total";
}

pub fn record_routing_decision(tier: Tier, source: ProfileSource) {
    let labels = [
        ("tier", tier.number().to_string()),
        (
            "source",
            match source {
                ProfileSource::Probe => "probe",
                ProfileSource::Complexity => "complexity",
            }
            .to_string(),
        ),
    ];
    counter!(names::ROUTING_DECISIONS_TOTAL, &labels).increment(1);
}

pub fn record_probe_failure() {
    counter!(names::PROBE_FAILURES_TOTAL).increment(1);
}

pub fn record_rule_evaluation(action: FallbackAction) {
    let labels = [("action", action.as_str().to_string())];
    counter!(names::RULE_EVALUATIONS_TOTAL, &labels).increment(1);
}

pub fn record_conservative_decision() {
    counter!(names::RULE_CONSERVATIVE_DECISIONS_TOTAL).increment(1);
}

/// Record one backend attempt. `outcome` is "success" or a `BackendError::kind()`.
pub fn record_backend_attempt(tier: Tier, outcome: &str) {
    let labels = [
        ("tier", tier.number().to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::BACKEND_ATTEMPTS_TOTAL, &labels).increment(1);
}

pub fn record_fallback(from: Tier, to: Tier) {
    let labels = [
        ("from", from.number().to_string()),
        ("to", to.number().to_string()),
    ];
    counter!(names::FALLBACKS_TOTAL, &labels).increment(1);
}

pub fn record_preprocessing_duration(duration_secs: f64) {
    histogram!(names::PREPROCESSING_DURATION_SECONDS).record(duration_secs);
}

pub fn record_completed(tier: Tier, duration_secs: f64, cost_usd: f64) {
    let labels = [("tier", tier.number().to_string())];
    counter!(names::REQUESTS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
    histogram!(names::REQUEST_COST_USD, &labels).record(cost_usd);
}

pub fn record_failed(kind: FailureKind) {
    let kind = match kind {
        FailureKind::Backend => "backend",
        FailureKind::Terminal => "terminal",
        FailureKind::Cancelled => "cancelled",
        FailureKind::Unavailable => "unavailable",
    };
    let labels = [("kind", kind.to_string())];
    counter!(names::REQUESTS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!(names::REQUESTS_IN_FLIGHT).set(count as f64);
}

pub fn record_dedup_join() {
    counter!(names::DEDUP_JOINS_TOTAL).increment(1);
}
