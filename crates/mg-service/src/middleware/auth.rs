//! Session-validation middleware for protected routes.
//!
//! Extracts the bearer token, validates it against the session store, and
//! injects the resulting [`SessionHandle`] into request extensions for
//! handlers and the rate limiter. Rejections emit a security audit record.

use crate::audit::AuditSink;
use crate::errors::GatewayError;
use crate::models::{AuditKind, AuditOutcome, AuditRecord, AuditSeverity};
use crate::session::SessionStore;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub sessions: Arc<SessionStore>,
    pub audit: AuditSink,
}

/// Validate the session token and stash the handle in extensions.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
#[instrument(skip_all, name = "mg.middleware.auth")]
pub async fn require_session(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GatewayError> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match state.sessions.validate(token).await {
        Ok(handle) => {
            req.extensions_mut().insert(handle);
            Ok(next.run(req).await)
        }
        Err(failure) => {
            state.audit.emit(
                AuditRecord::new(
                    AuditKind::SecurityEvent,
                    AuditSeverity::Warning,
                    "session",
                    "validate",
                )
                .with_outcome(AuditOutcome::Denied)
                .with_detail("failure", failure.to_string()),
            );
            Err(GatewayError::from(failure))
        }
    }
}
