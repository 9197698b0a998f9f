//! HTTP routes and shared application state.
//!
//! This module is the only composition point the HTTP surface sees: it wires
//! the middleware chain (inbound audit → session validation → rate limit)
//! and binds each endpoint to its handler. Handlers receive everything
//! through [`AppState`]; there are no global singletons.

use crate::audit::AuditSink;
use crate::config::Config;
use crate::federation::Orchestrator;
use crate::handlers;
use crate::middleware::{
    audit_http, enforce_rate_limit, require_session, AuthState, HttpAuditState, RateLimitState,
};
use crate::ratelimit::{EndpointClass, RateLimiter};
use crate::session::SessionStore;
use crate::tools::ToolPool;
use axum::extract::DefaultBodyLimit;
use axum::response::Redirect;
use axum::routing::{any, get, post};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Slack added on top of the image ceiling for the other multipart fields.
const BODY_LIMIT_SLACK: usize = 2 * 1024 * 1024;

/// Application state shared across all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub limiter: Arc<RateLimiter>,
    pub audit: AuditSink,
    pub pool: Arc<ToolPool>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
    /// Root token cancelled at shutdown; requests derive children from it.
    pub shutdown: CancellationToken,
}

/// Build the application router.
///
/// Layer order (outermost first on the request path): body limit, CORS,
/// request timeout, trace, inbound HTTP audit, then per-route session
/// validation and rate limiting.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let auth_state = AuthState {
        sessions: state.sessions.clone(),
        audit: state.audit.clone(),
    };
    let http_audit_state = HttpAuditState {
        audit: state.audit.clone(),
        sessions: state.sessions.clone(),
    };
    let rate_state = |class: EndpointClass| RateLimitState {
        limiter: state.limiter.clone(),
        sessions: state.sessions.clone(),
        audit: state.audit.clone(),
        class,
    };

    // Public routes (no authentication)
    let public_routes = Router::new()
        .route("/", get(handlers::identity))
        .route("/api/health", get(handlers::aggregate_health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/chat", any(legacy_chat_redirect))
        .with_state(state.clone());

    // Session issuance: public but rate limited by hashed peer address
    let session_routes = Router::new()
        .route("/api/session", post(handlers::create_session))
        .route_layer(middleware::from_fn_with_state(
            rate_state(EndpointClass::Session),
            enforce_rate_limit,
        ))
        .with_state(state.clone());

    // Medical synthesis endpoints: session + medical-class rate limit
    let medical_routes = Router::new()
        .route("/api/medical-chat", post(handlers::medical_chat))
        .route(
            "/api/medical/differential-diagnosis",
            post(handlers::differential_diagnosis),
        )
        .route(
            "/api/medical/clinical-trials",
            post(handlers::clinical_trials),
        )
        .route(
            "/api/medical/drug-interactions",
            post(handlers::drug_interactions),
        )
        .route("/api/medical/image-analysis", post(handlers::image_analysis))
        .route_layer(middleware::from_fn_with_state(
            rate_state(EndpointClass::Medical),
            enforce_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_session,
        ))
        .with_state(state.clone());

    // Protected introspection endpoints: session + general-class rate limit
    let introspection_routes = Router::new()
        .route("/api/medical/health", get(handlers::medical_health))
        .route("/api/medical/tools", get(handlers::tool_capabilities))
        .route(
            "/api/medical/compliance-report",
            get(handlers::compliance_report),
        )
        .route_layer(middleware::from_fn_with_state(
            rate_state(EndpointClass::General),
            enforce_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(auth_state, require_session))
        .with_state(state.clone());

    let body_limit = state.config.max_image_bytes() + BODY_LIMIT_SLACK;
    let cors = cors_layer(&state.config);

    public_routes
        .merge(session_routes)
        .merge(medical_routes)
        .merge(introspection_routes)
        .layer(middleware::from_fn_with_state(http_audit_state, audit_http))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}

/// The legacy chat path permanently redirects to the medical endpoint.
async fn legacy_chat_redirect() -> Redirect {
    Redirect::permanent("/api/medical-chat")
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::new();
    }
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_tolerates_bad_origins() {
        let mut vars = std::collections::HashMap::from([
            (
                "ENCRYPTION_KEY".to_string(),
                {
                    use base64::Engine as _;
                    base64::engine::general_purpose::STANDARD.encode([0u8; 32])
                },
            ),
            (
                "JWT_SECRET".to_string(),
                "0123456789abcdef0123456789abcdef".to_string(),
            ),
        ]);
        vars.insert(
            "CORS_ORIGINS".to_string(),
            "https://ok.example,\u{0}bad".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        // Must not panic on the malformed origin
        let _ = cors_layer(&config);
    }
}
