//! HTTP request handlers.
//!
//! Handlers do no synthesis: they parse the request, call one orchestration
//! or store method, and return its result. Everything interesting lives in
//! the components they compose.

mod chat_handler;
mod health_handler;
mod medical_handler;
mod session_handler;

pub use chat_handler::medical_chat;
pub use health_handler::{
    aggregate_health, compliance_report, identity, medical_health, metrics, tool_capabilities,
};
pub use medical_handler::{clinical_trials, differential_diagnosis, drug_interactions, image_analysis};
pub use session_handler::create_session;

use crate::models::ChatMessage;
use tokio::time::Instant;

/// Wall-clock budget for one synthesis request. Below the 30 s request
/// timeout layer so the orchestrator finishes before the connection is cut.
pub(crate) const REQUEST_BUDGET: std::time::Duration = std::time::Duration::from_secs(25);

pub(crate) fn request_deadline() -> Instant {
    Instant::now() + REQUEST_BUDGET
}

/// Parse an optional JSON-encoded conversation history field, keeping only
/// well-formed user/assistant turns.
pub(crate) fn parse_history(raw: Option<&str>) -> Vec<ChatMessage> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<ChatMessage>>(raw)
        .map(|messages| {
            messages
                .into_iter()
                .filter(|message| message.role == "user" || message.role == "assistant")
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history_filters_roles() {
        let raw = r#"[
            {"role": "user", "content": "a"},
            {"role": "system", "content": "b"},
            {"role": "assistant", "content": "c"}
        ]"#;
        let history = parse_history(Some(raw));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "a");
        assert_eq!(history[1].content, "c");
    }

    #[test]
    fn test_parse_history_tolerates_garbage() {
        assert!(parse_history(Some("not json")).is_empty());
        assert!(parse_history(None).is_empty());
    }
}
