//! Unified LLM adapter.
//!
//! One seam ([`LlmProvider`]) hides the upstream transport; the adapter owns
//! ordering (preferred provider first, the other on error or deadline),
//! per-call deadlines, output parsing, and confidence scoring. Total failure
//! of both providers is an ordinary typed outcome, never an error the
//! request path has to catch.

pub mod mock;
pub mod parse;
pub mod provider;

pub use mock::MockLlmProvider;
pub use provider::{HttpLlmProvider, HttpLlmProviderConfig};

use crate::models::ResponseHint;
use crate::observability::metrics::record_llm_call;
use async_trait::async_trait;
use parse::ParsedOutput;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("llm unavailable: {0}")]
    Unavailable(String),

    #[error("llm call timed out")]
    Timeout,

    #[error("llm returned an unusable response: {0}")]
    BadResponse(String),
}

/// Generation parameters. Configuration, not code: the composition root
/// fills these from the environment.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.8,
            max_tokens: 2048,
        }
    }
}

/// A text-generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub hint: ResponseHint,
    pub params: GenerationParams,
}

/// A vision call: prompt plus normalized image bytes.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub hint: ResponseHint,
    pub image: Vec<u8>,
    pub image_mime: String,
    pub params: GenerationParams,
}

/// The provider seam. Implementations: [`HttpLlmProvider`] in production,
/// [`MockLlmProvider`] in tests and harnesses.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
    async fn analyze_image(&self, request: &VisionRequest) -> Result<String, LlmError>;
}

/// Which provider the adapter tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelPreference {
    #[default]
    Primary,
    Fallback,
}

/// A successful generation, parsed and scored.
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    /// Provider label that produced this ("primary" / "fallback").
    pub provider: String,
    pub output: ParsedOutput,
}

/// The adapter's typed result: generation or a recorded double failure.
#[derive(Debug, Clone)]
pub enum LlmResult {
    Generated(LlmOutcome),
    /// Both providers failed; causes in attempt order.
    Unavailable { causes: Vec<String> },
}

impl LlmResult {
    pub fn is_generated(&self) -> bool {
        matches!(self, LlmResult::Generated(_))
    }
}

/// Primary/fallback LLM adapter.
pub struct LlmAdapter {
    primary: Arc<dyn LlmProvider>,
    fallback: Option<Arc<dyn LlmProvider>>,
    preference: ModelPreference,
    call_timeout: Duration,
    params: GenerationParams,
    disclaimer: Option<String>,
}

impl LlmAdapter {
    pub fn new(
        primary: Arc<dyn LlmProvider>,
        fallback: Option<Arc<dyn LlmProvider>>,
        preference: ModelPreference,
        call_timeout: Duration,
        params: GenerationParams,
        disclaimer: Option<String>,
    ) -> Self {
        Self {
            primary,
            fallback,
            preference,
            call_timeout,
            params,
            disclaimer,
        }
    }

    /// Disclaimer text to append to responses, when configured.
    pub fn disclaimer(&self) -> Option<&str> {
        self.disclaimer.as_deref()
    }

    /// Providers in attempt order under the configured preference.
    fn attempt_order(&self) -> Vec<Arc<dyn LlmProvider>> {
        match (self.preference, &self.fallback) {
            (ModelPreference::Primary, Some(fallback)) => {
                vec![self.primary.clone(), fallback.clone()]
            }
            (ModelPreference::Fallback, Some(fallback)) => {
                vec![fallback.clone(), self.primary.clone()]
            }
            (_, None) => vec![self.primary.clone()],
        }
    }

    /// Generate text for an assembled prompt.
    #[instrument(skip_all, name = "mg.llm.generate", fields(hint = hint.as_str()))]
    pub async fn generate(&self, prompt: String, hint: ResponseHint, deadline: Instant) -> LlmResult {
        let request = GenerationRequest {
            prompt,
            hint,
            params: self.params,
        };
        self.drive(hint, deadline, |provider| {
            let request = request.clone();
            async move { provider.generate(&request).await }
        })
        .await
    }

    /// Analyze an image alongside its clinical prompt.
    #[instrument(skip_all, name = "mg.llm.vision", fields(hint = hint.as_str()))]
    pub async fn analyze_image(
        &self,
        prompt: String,
        hint: ResponseHint,
        image: Vec<u8>,
        image_mime: String,
        deadline: Instant,
    ) -> LlmResult {
        let request = VisionRequest {
            prompt,
            hint,
            image,
            image_mime,
            params: self.params,
        };
        self.drive(hint, deadline, move |provider| {
            let request = request.clone();
            async move { provider.analyze_image(&request).await }
        })
        .await
    }

    /// Try each provider in order, bounded by both the per-call timeout and
    /// the request deadline remainder.
    async fn drive<F, Fut>(&self, hint: ResponseHint, deadline: Instant, mut call: F) -> LlmResult
    where
        F: FnMut(Arc<dyn LlmProvider>) -> Fut,
        Fut: std::future::Future<Output = Result<String, LlmError>>,
    {
        let mut causes = Vec::new();

        for provider in self.attempt_order() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                causes.push("request deadline exhausted".to_string());
                break;
            }
            let budget = remaining.min(self.call_timeout);
            let name = provider.name().to_string();
            let started = Instant::now();

            match tokio::time::timeout(budget, call(provider)).await {
                Ok(Ok(text)) => {
                    record_llm_call(&name, "ok", started.elapsed());
                    let output = parse::parse_output(&text, hint);
                    info!(
                        target: "mg.llm",
                        provider = %name,
                        structured = output.structured,
                        confidence = output.confidence,
                        "generation complete"
                    );
                    return LlmResult::Generated(LlmOutcome {
                        provider: name,
                        output,
                    });
                }
                Ok(Err(e)) => {
                    record_llm_call(&name, "error", started.elapsed());
                    warn!(target: "mg.llm", provider = %name, error = %e, "provider failed");
                    causes.push(format!("{name}: {e}"));
                }
                Err(_) => {
                    record_llm_call(&name, "timeout", started.elapsed());
                    warn!(target: "mg.llm", provider = %name, "provider timed out");
                    causes.push(format!("{name}: {}", LlmError::Timeout));
                }
            }
        }

        LlmResult::Unavailable { causes }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn adapter(
        primary: Arc<dyn LlmProvider>,
        fallback: Option<Arc<dyn LlmProvider>>,
    ) -> LlmAdapter {
        LlmAdapter::new(
            primary,
            fallback,
            ModelPreference::Primary,
            Duration::from_secs(1),
            GenerationParams::default(),
            Some("Research support only.".to_string()),
        )
    }

    #[tokio::test]
    async fn test_primary_success() {
        let primary = Arc::new(MockLlmProvider::structured(
            "primary",
            json!({"summary": "ok", "findings": [], "recommendations": []}),
        ));
        let result = adapter(primary.clone(), None)
            .generate("q".to_string(), ResponseHint::General, soon())
            .await;

        let LlmResult::Generated(outcome) = result else {
            panic!("expected generation");
        };
        assert_eq!(outcome.provider, "primary");
        assert!(outcome.output.structured);
        assert_eq!(primary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_on_primary_failure() {
        let primary = Arc::new(MockLlmProvider::failing("primary"));
        let fallback = Arc::new(MockLlmProvider::text("fallback", "plain answer"));
        let result = adapter(primary.clone(), Some(fallback.clone()))
            .generate("q".to_string(), ResponseHint::General, soon())
            .await;

        let LlmResult::Generated(outcome) = result else {
            panic!("expected generation");
        };
        assert_eq!(outcome.provider, "fallback");
        assert!(!outcome.output.structured);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn test_double_failure_is_typed() {
        let primary = Arc::new(MockLlmProvider::failing("primary"));
        let fallback = Arc::new(MockLlmProvider::failing("fallback"));
        let result = adapter(primary, Some(fallback))
            .generate("q".to_string(), ResponseHint::General, soon())
            .await;

        let LlmResult::Unavailable { causes } = result else {
            panic!("expected unavailability");
        };
        assert_eq!(causes.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_preference_reverses_order() {
        let primary = Arc::new(MockLlmProvider::text("primary", "from primary"));
        let fallback = Arc::new(MockLlmProvider::text("fallback", "from fallback"));
        let adapter = LlmAdapter::new(
            primary.clone(),
            Some(fallback.clone()),
            ModelPreference::Fallback,
            Duration::from_secs(1),
            GenerationParams::default(),
            None,
        );
        let result = adapter
            .generate("q".to_string(), ResponseHint::General, soon())
            .await;

        let LlmResult::Generated(outcome) = result else {
            panic!("expected generation");
        };
        assert_eq!(outcome.provider, "fallback");
        assert_eq!(primary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_deadline_skips_calls() {
        let primary = Arc::new(MockLlmProvider::text("primary", "x"));
        let result = adapter(primary.clone(), None)
            .generate("q".to_string(), ResponseHint::General, Instant::now())
            .await;

        assert!(!result.is_generated());
        assert_eq!(primary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_vision_path() {
        let primary = Arc::new(MockLlmProvider::structured(
            "primary",
            json!({"summary": "no acute findings", "findings": [], "impression": "clear", "recommendations": []}),
        ));
        let result = adapter(primary, None)
            .analyze_image(
                "review image".to_string(),
                ResponseHint::ImageAnalysis,
                vec![0xFF, 0xD8],
                "image/jpeg".to_string(),
                soon(),
            )
            .await;
        let LlmResult::Generated(outcome) = result else {
            panic!("expected generation");
        };
        assert!(outcome.output.confidence >= 0.9);
    }
}
