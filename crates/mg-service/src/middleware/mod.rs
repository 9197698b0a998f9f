//! Request middleware: inbound HTTP audit, session validation, and rate
//! limiting. Order in the chain matters and is fixed by `routes`:
//! audit wraps everything, auth runs before the rate limiter so limits key
//! on the session when one exists.

mod audit;
mod auth;
mod rate_limit;

pub use audit::{audit_http, HttpAuditState};
pub use auth::{require_session, AuthState};
pub use rate_limit::{enforce_rate_limit, RateLimitState};
