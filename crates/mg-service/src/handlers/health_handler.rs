//! Health, capability, compliance, and identity handlers.

use crate::errors::GatewayError;
use crate::routes::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// GET / - identity and version.
pub async fn identity() -> Json<Value> {
    Json(json!({
        "service": "medical-research-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub sessions: usize,
    pub tools_connected: usize,
    pub tools_total: usize,
}

/// GET /api/health - aggregate health.
///
/// Reports degraded rather than erroring out: orchestration tolerates
/// partial tool availability, so the gateway is "healthy" as long as it can
/// serve requests at all.
#[instrument(skip_all, name = "mg.handlers.health")]
pub async fn aggregate_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let connected = state.pool.connected_count();
    let total = state.pool.len();
    let status = if total == 0 || connected > 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        sessions: state.sessions.len().await,
        tools_connected: connected,
        tools_total: total,
    })
}

/// GET /api/medical/health - per-component health.
#[instrument(skip_all, name = "mg.handlers.medical_health")]
pub async fn medical_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let statuses: BTreeMap<String, String> = state
        .pool
        .status_map()
        .into_iter()
        .map(|(name, status)| (name.as_str().to_string(), status.as_str().to_string()))
        .collect();
    let errors: BTreeMap<String, String> = state
        .pool
        .error_map()
        .into_iter()
        .map(|(name, cause)| (name.as_str().to_string(), cause))
        .collect();

    Json(json!({
        "sessions": {
            "live": state.sessions.len().await,
        },
        "tools": {
            "status": statuses,
            "errors": errors,
            "connected": state.pool.connected_count(),
        },
        "llm": {
            "primaryConfigured": state.config.llm_primary.is_some(),
            "fallbackConfigured": state.config.llm_fallback.is_some(),
        },
        "audit": {
            "queueCapacity": state.audit.queue_capacity(),
            "droppedRecords": state.audit.dropped_count(),
        },
        "rateLimiter": {
            "trackedKeys": state.limiter.tracked_keys(),
        },
    }))
}

/// GET /api/medical/tools - pool capabilities.
#[instrument(skip_all, name = "mg.handlers.tools")]
pub async fn tool_capabilities(State(state): State<Arc<AppState>>) -> Json<Value> {
    let statuses: BTreeMap<String, String> = state
        .pool
        .status_map()
        .into_iter()
        .map(|(name, status)| (name.as_str().to_string(), status.as_str().to_string()))
        .collect();

    Json(json!({
        "capabilities": state.pool.capabilities(),
        "clients": statuses,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ComplianceQuery {
    #[serde(default)]
    pub timeframe: Option<String>,
}

/// GET /api/medical/compliance-report?timeframe=…
///
/// Accepted timeframes: `1h`, `24h` (default), `7d`. The windowed counts
/// retain 24 hours; wider timeframes fall back to process-lifetime totals.
#[instrument(skip_all, name = "mg.handlers.compliance")]
pub async fn compliance_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ComplianceQuery>,
) -> Result<Json<Value>, GatewayError> {
    let label = query.timeframe.as_deref().unwrap_or("24h");
    let duration = match label {
        "1h" => ChronoDuration::hours(1),
        "24h" => ChronoDuration::hours(24),
        "7d" => ChronoDuration::days(7),
        other => {
            return Err(GatewayError::InvalidField {
                field: "timeframe".to_string(),
                reason: format!("unsupported timeframe '{other}' (expected 1h, 24h, or 7d)"),
            })
        }
    };

    let report = state.audit.compliance_report(duration, label);
    Ok(Json(serde_json::to_value(report).map_err(|_| GatewayError::Internal)?))
}

/// GET /metrics - Prometheus exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}
