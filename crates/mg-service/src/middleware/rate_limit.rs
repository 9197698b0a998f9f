//! Rate-limit middleware.
//!
//! Keys on the session id when auth has already populated the extension,
//! else on the hashed peer address. A rejection returns the typed
//! `RateLimited` error (429 with reset headers) and emits a
//! `security-event/rate-limit` audit record; an acceptance stamps the
//! remaining/reset headers onto the response.

use crate::audit::AuditSink;
use crate::errors::GatewayError;
use crate::models::{AuditKind, AuditOutcome, AuditRecord, AuditSeverity};
use crate::ratelimit::{EndpointClass, RateLimiter};
use crate::session::{SessionHandle, SessionStore};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::instrument;

/// State for the rate-limit middleware; one instance per endpoint class.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionStore>,
    pub audit: AuditSink,
    pub class: EndpointClass,
}

#[instrument(skip_all, name = "mg.middleware.rate_limit")]
pub async fn enforce_rate_limit(
    State(state): State<RateLimitState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    // Session id when present; hashed peer address otherwise. Raw addresses
    // never become keys.
    let (identifier, identifier_hash) = match req.extensions().get::<SessionHandle>() {
        Some(handle) => (handle.id.clone(), handle.id_hash.clone()),
        None => {
            let hashed = state.sessions.hash(&peer.ip().to_string());
            (hashed.clone(), hashed)
        }
    };

    let decision = state.limiter.check(&identifier, state.class);
    if !decision.allowed {
        state.audit.emit(
            AuditRecord::new(
                AuditKind::SecurityEvent,
                AuditSeverity::Warning,
                "rate-limit",
                state.class.as_str(),
            )
            .with_session_hash(identifier_hash)
            .with_outcome(AuditOutcome::Denied),
        );
        return Err(GatewayError::RateLimited {
            remaining: 0,
            reset_at: decision.reset_at,
        });
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_at.timestamp().to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
    Ok(response)
}
