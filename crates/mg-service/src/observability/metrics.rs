//! Metrics definitions for the gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mg_` prefix for the medical gateway
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `class`: 3 values (session, general, medical)
//! - `action`: 2 values (allowed, rejected)
//! - `client`: 5 values (the closed tool-name set)
//! - `status`: small closed sets per metric
//! - `kind`/`severity`: the closed audit vocabularies

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record one handled HTTP request.
///
/// Metric: `mg_http_requests_total`, `mg_http_request_duration_seconds`
/// Labels: `path` (route template, bounded), `status`
pub fn record_http_request(path: &str, status: u16, duration: Duration) {
    counter!("mg_http_requests_total", "path" => path.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("mg_http_request_duration_seconds", "path" => path.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Audit Metrics
// ============================================================================

/// Record one audit record accepted by the sink.
///
/// Metric: `mg_audit_records_total`
/// Labels: `kind`, `severity`
pub fn record_audit_emitted(kind: &str, severity: &str) {
    counter!("mg_audit_records_total", "kind" => kind.to_string(), "severity" => severity.to_string())
        .increment(1);
}

/// Record one shed audit record.
///
/// Metric: `mg_audit_dropped_total`
pub fn record_audit_dropped() {
    counter!("mg_audit_dropped_total").increment(1);
}

// ============================================================================
// Rate Limiting Metrics
// ============================================================================

/// Record a rate limit decision.
///
/// Metric: `mg_rate_limit_decisions_total`
/// Labels: `class`, `action` (allowed, rejected)
pub fn record_rate_limit_decision(class: &str, action: &str) {
    counter!("mg_rate_limit_decisions_total", "class" => class.to_string(), "action" => action.to_string())
        .increment(1);
}

// ============================================================================
// Tool Pool Metrics
// ============================================================================

/// Record one tool call outcome.
///
/// Metric: `mg_tool_calls_total`, `mg_tool_call_duration_seconds`
/// Labels: `client`, `method`, `status` (ok, error)
pub fn record_tool_call(client: &str, method: &str, status: &str, duration: Duration) {
    counter!("mg_tool_calls_total", "client" => client.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("mg_tool_call_duration_seconds", "client" => client.to_string())
        .record(duration.as_secs_f64());
}

/// Record one scheduled reconnect.
///
/// Metric: `mg_tool_reconnects_total`
/// Labels: `client`
pub fn record_tool_reconnect(client: &str) {
    counter!("mg_tool_reconnects_total", "client" => client.to_string()).increment(1);
}

/// Update the connected-clients gauge.
///
/// Metric: `mg_tool_clients_connected`
pub fn set_tool_clients_connected(count: usize) {
    gauge!("mg_tool_clients_connected").set(count as f64);
}

// ============================================================================
// LLM Metrics
// ============================================================================

/// Record one provider attempt.
///
/// Metric: `mg_llm_calls_total`, `mg_llm_call_duration_seconds`
/// Labels: `provider`, `status` (ok, error, timeout)
pub fn record_llm_call(provider: &str, status: &str, duration: Duration) {
    counter!("mg_llm_calls_total", "provider" => provider.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("mg_llm_call_duration_seconds", "provider" => provider.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Federation Metrics
// ============================================================================

/// Record one synthesis pipeline run.
///
/// Metric: `mg_federation_total`, `mg_federation_duration_seconds`
/// Labels: `urgency`, `outcome` (ok, degraded)
pub fn record_federation(urgency: &str, outcome: &str, duration: Duration) {
    counter!("mg_federation_total", "urgency" => urgency.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    histogram!("mg_federation_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Update the live-sessions gauge.
///
/// Metric: `mg_sessions_live`
pub fn set_sessions_live(count: usize) {
    gauge!("mg_sessions_live").set(count as f64);
}
