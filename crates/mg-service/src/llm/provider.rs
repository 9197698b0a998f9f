//! HTTP-backed LLM provider speaking the chat-completions contract.

use super::{GenerationRequest, LlmError, LlmProvider, VisionRequest};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use common::secret::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Configuration for one upstream provider.
pub struct HttpLlmProviderConfig {
    /// Short label used in logs and per-source confidences ("primary",
    /// "fallback").
    pub name: String,
    /// Base URL up to but excluding `/chat/completions`.
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
}

/// Reqwest-backed provider. One instance per upstream; the client reuses
/// connections across calls.
pub struct HttpLlmProvider {
    config: HttpLlmProviderConfig,
    client: reqwest::Client,
}

impl HttpLlmProvider {
    pub fn new(config: HttpLlmProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, body: Value) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "mg.llm", provider = %self.config.name, error = %e, "request failed");
                LlmError::Unavailable(format!("{}: request failed", self.config.name))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "mg.llm", provider = %self.config.name, status = %status, "non-success status");
            return Err(LlmError::Unavailable(format!(
                "{}: upstream status {status}",
                self.config.name
            )));
        }

        let payload: Value = response.json().await.map_err(|e| {
            LlmError::BadResponse(format!("{}: body decode: {e}", self.config.name))
        })?;

        let content = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LlmError::BadResponse(format!("{}: no completion content", self.config.name))
            })?;

        debug!(
            target: "mg.llm",
            provider = %self.config.name,
            chars = content.len(),
            "completion received"
        );
        Ok(content.to_string())
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "max_tokens": request.params.max_tokens,
        });
        self.complete(body).await
    }

    async fn analyze_image(&self, request: &VisionRequest) -> Result<String, LlmError> {
        let data_url = format!(
            "data:{};base64,{}",
            request.image_mime,
            general_purpose::STANDARD.encode(&request.image)
        );
        let body = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": request.prompt},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "max_tokens": request.params.max_tokens,
        });
        self.complete(body).await
    }
}
