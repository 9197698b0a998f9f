//! Gateway error taxonomy.
//!
//! Every error surfaced to a client has exactly one kind from the closed set
//! below, and every error body has the same wire shape:
//! `{error, code, timestamp, details?}`. Internal causes are logged
//! server-side and never leak into bodies.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::imaging::ImagingError;
use crate::session::ValidationFailure;

#[derive(Debug, Error)]
pub enum GatewayError {
    // Input errors (client)
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("payload exceeds the {limit_bytes} byte limit")]
    PayloadTooLarge { limit_bytes: usize },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    // Auth errors (client)
    #[error("no session token provided")]
    NoSessionToken,

    #[error("invalid session")]
    InvalidSession,

    #[error("session expired")]
    SessionExpired,

    // Throttling (client)
    #[error("rate limit exceeded")]
    RateLimited {
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    // Upstream errors (server, recoverable). Mostly absorbed as partial
    // results inside the orchestrator; surfaced only by endpoints that
    // depend on exactly one upstream.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("tool call timed out: {0}")]
    ToolTimeout(String),

    #[error("tool returned an error: {0}")]
    ToolReturnedError(String),

    #[error("language model unavailable")]
    LlmUnavailable,

    #[error("language model timed out")]
    LlmTimeout,

    // System errors (server)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error")]
    Internal,
}

impl GatewayError {
    /// The closed wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingField(_) => "MISSING_FIELD",
            GatewayError::InvalidField { .. } => "INVALID_FIELD",
            GatewayError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::InvalidImage(_) => "INVALID_IMAGE",
            GatewayError::NoSessionToken => "NO_SESSION_TOKEN",
            GatewayError::InvalidSession => "INVALID_SESSION",
            GatewayError::SessionExpired => "SESSION_EXPIRED",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::ToolUnavailable(_) => "TOOL_UNAVAILABLE",
            GatewayError::ToolTimeout(_) => "TOOL_TIMEOUT",
            GatewayError::ToolReturnedError(_) => "TOOL_ERROR",
            GatewayError::LlmUnavailable => "LLM_UNAVAILABLE",
            GatewayError::LlmTimeout => "LLM_TIMEOUT",
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
            GatewayError::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingField(_) | GatewayError::InvalidField { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::NoSessionToken
            | GatewayError::InvalidSession
            | GatewayError::SessionExpired => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ToolUnavailable(_)
            | GatewayError::ToolTimeout(_)
            | GatewayError::ToolReturnedError(_)
            | GatewayError::LlmUnavailable
            | GatewayError::LlmTimeout
            | GatewayError::Configuration(_)
            | GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-safe message. Internal variants collapse to a generic line.
    fn public_message(&self) -> String {
        match self {
            GatewayError::Configuration(_) | GatewayError::Internal => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Optional structured details for the body.
    fn details(&self) -> Option<Value> {
        match self {
            GatewayError::RateLimited {
                remaining,
                reset_at,
            } => Some(serde_json::json!({
                "remaining": remaining,
                "resetAt": reset_at.timestamp(),
            })),
            GatewayError::PayloadTooLarge { limit_bytes } => {
                Some(serde_json::json!({ "limitBytes": limit_bytes }))
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Internal causes are logged here, once, and never leaked
        if matches!(
            self,
            GatewayError::Configuration(_) | GatewayError::Internal
        ) {
            tracing::error!(target: "mg.http", error = %self, "internal failure");
        }

        let body = ErrorBody {
            error: self.public_message(),
            code: self.code(),
            timestamp: Utc::now(),
            details: self.details(),
        };

        let mut response = (self.status(), Json(body)).into_response();

        if let GatewayError::RateLimited {
            remaining,
            reset_at,
        } = &self
        {
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                headers.insert("X-RateLimit-Remaining", value);
            }
            if let Ok(value) = HeaderValue::from_str(&reset_at.timestamp().to_string()) {
                headers.insert("X-RateLimit-Reset", value);
            }
        }

        response
    }
}

impl From<ValidationFailure> for GatewayError {
    fn from(failure: ValidationFailure) -> Self {
        match failure {
            ValidationFailure::NoToken => GatewayError::NoSessionToken,
            ValidationFailure::Expired => GatewayError::SessionExpired,
            ValidationFailure::BadSignature
            | ValidationFailure::UnknownSession
            | ValidationFailure::Inactive => GatewayError::InvalidSession,
        }
    }
}

impl From<ImagingError> for GatewayError {
    fn from(error: ImagingError) -> Self {
        match error {
            ImagingError::InvalidImage(reason) => GatewayError::InvalidImage(reason),
            ImagingError::UnsupportedFormat(format) => GatewayError::UnsupportedMediaType(format),
            ImagingError::TooLarge { limit, .. } => {
                GatewayError::PayloadTooLarge { limit_bytes: limit }
            }
            ImagingError::TranscodeFailed(reason) => {
                tracing::error!(target: "mg.imaging", reason = %reason, "transcode failure");
                GatewayError::Internal
            }
        }
    }
}

impl From<CryptoError> for GatewayError {
    fn from(error: CryptoError) -> Self {
        tracing::error!(target: "mg.crypto", error = %error, "crypto failure");
        GatewayError::Internal
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::MissingField("message".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::UnsupportedMediaType("pdf".to_string()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            GatewayError::PayloadTooLarge { limit_bytes: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::NoSessionToken.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::RateLimited {
                remaining: 0,
                reset_at: Utc::now()
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_codes_are_closed_set() {
        let samples = [
            GatewayError::MissingField(String::new()),
            GatewayError::InvalidField {
                field: String::new(),
                reason: String::new(),
            },
            GatewayError::UnsupportedMediaType(String::new()),
            GatewayError::PayloadTooLarge { limit_bytes: 0 },
            GatewayError::InvalidImage(String::new()),
            GatewayError::NoSessionToken,
            GatewayError::InvalidSession,
            GatewayError::SessionExpired,
            GatewayError::RateLimited {
                remaining: 0,
                reset_at: Utc::now(),
            },
            GatewayError::ToolUnavailable(String::new()),
            GatewayError::ToolTimeout(String::new()),
            GatewayError::ToolReturnedError(String::new()),
            GatewayError::LlmUnavailable,
            GatewayError::LlmTimeout,
            GatewayError::Configuration(String::new()),
            GatewayError::Internal,
        ];
        let codes: Vec<&str> = samples.iter().map(GatewayError::code).collect();
        let unique: std::collections::BTreeSet<&str> = codes.iter().copied().collect();
        assert_eq!(unique.len(), samples.len(), "codes must be distinct");
    }

    #[test]
    fn test_internal_details_do_not_leak() {
        let error = GatewayError::Configuration("JWT_SECRET missing".to_string());
        assert_eq!(error.public_message(), "An internal error occurred");
    }

    #[test]
    fn test_session_failure_mapping() {
        assert_eq!(
            GatewayError::from(ValidationFailure::NoToken).code(),
            "NO_SESSION_TOKEN"
        );
        assert_eq!(
            GatewayError::from(ValidationFailure::Expired).code(),
            "SESSION_EXPIRED"
        );
        assert_eq!(
            GatewayError::from(ValidationFailure::Inactive).code(),
            "INVALID_SESSION"
        );
    }

    #[test]
    fn test_imaging_error_mapping() {
        assert_eq!(
            GatewayError::from(ImagingError::TooLarge {
                size: 10,
                limit: 5
            })
            .code(),
            "PAYLOAD_TOO_LARGE"
        );
        assert_eq!(
            GatewayError::from(ImagingError::UnsupportedFormat("gifv".to_string())).code(),
            "UNSUPPORTED_MEDIA_TYPE"
        );
    }
}
