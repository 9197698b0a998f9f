//! Scripted LLM provider for tests and harnesses.
//!
//! Exported as a regular module so the test-utils crate can wire it into a
//! full gateway without rebuilding the adapter plumbing.

use super::{GenerationRequest, LlmError, LlmProvider, VisionRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

enum Script {
    Reply(String),
    Fail(String),
}

/// A provider that replays a fixed script.
pub struct MockLlmProvider {
    name: String,
    script: Script,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl MockLlmProvider {
    /// Always replies with `text`.
    pub fn text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Script::Reply(text.to_string()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Always replies with `payload` serialized as the completion body.
    pub fn structured(name: &str, payload: serde_json::Value) -> Self {
        Self::text(name, &payload.to_string())
    }

    /// Always fails with `Unavailable`.
    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Script::Fail(format!("{name} scripted failure")),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Number of calls (generation plus vision) this mock served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompt of the most recent call, for assertions on prompt assembly.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|slot| slot.clone())
    }

    fn run(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_prompt.lock() {
            *slot = Some(prompt.to_string());
        }
        match &self.script {
            Script::Reply(text) => Ok(text.clone()),
            Script::Fail(cause) => Err(LlmError::Unavailable(cause.clone())),
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.run(&request.prompt)
    }

    async fn analyze_image(&self, request: &VisionRequest) -> Result<String, LlmError> {
        self.run(&request.prompt)
    }
}
