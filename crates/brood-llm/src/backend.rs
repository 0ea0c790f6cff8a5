//! Core generation backend trait.

use async_trait::async_trait;
use brood_core::types::ModelTier;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Generation-service errors.
///
/// `RateLimited` and `Unavailable` are retryable later; `InvalidResponse`
/// means skip the unit this cycle. None of them abort a population cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::RateLimited(_) | GenerationError::Unavailable(_))
    }
}

/// Result type for generation calls.
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Model name per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierModels {
    pub swift: String,
    pub standard: String,
    pub advanced: String,
    pub premier: String,
}

impl TierModels {
    /// Anthropic model ladder.
    pub fn claude() -> Self {
        Self {
            swift: "claude-3-haiku-20240307".to_string(),
            standard: "claude-3-5-haiku-20241022".to_string(),
            advanced: "claude-3-5-sonnet-20241022".to_string(),
            premier: "claude-3-opus-20240229".to_string(),
        }
    }

    /// Local models; one per tier, smallest first.
    pub fn ollama() -> Self {
        Self {
            swift: "llama3.2:1b".to_string(),
            standard: "llama3.2".to_string(),
            advanced: "qwen2.5-coder:7b".to_string(),
            premier: "qwen2.5-coder:32b".to_string(),
        }
    }

    /// The same model for every tier.
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            swift: model.clone(),
            standard: model.clone(),
            advanced: model.clone(),
            premier: model,
        }
    }

    pub fn for_tier(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Swift => &self.swift,
            ModelTier::Standard => &self.standard,
            ModelTier::Advanced => &self.advanced,
            ModelTier::Premier => &self.premier,
        }
    }
}

/// The external generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Get the backend name.
    fn name(&self) -> &str;

    /// Generate text for a prompt within a token budget.
    async fn generate(
        &self,
        prompt: &str,
        tier: ModelTier,
        max_tokens: u32,
    ) -> GenerationResult<String>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> bool {
        !matches!(
            self.generate("ping", ModelTier::Swift, 8).await,
            Err(GenerationError::Unavailable(_))
        )
    }
}

/// One recorded call to [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub prompt: String,
    pub tier: ModelTier,
    pub max_tokens: u32,
}

/// A scripted backend for tests and dry runs.
///
/// Responses are taken from the pattern table first (first pattern the
/// prompt contains), then from the queue of scripted results, then the
/// default response.
pub struct MockBackend {
    responses: Vec<(String, String)>,
    script: Mutex<VecDeque<GenerationResult<String>>>,
    default_response: String,
    delay: Option<Duration>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            default_response: "```rust\npub fn placeholder() {}\n```".to_string(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a canned response for a prompt pattern.
    pub fn with_response(mut self, pattern: &str, response: &str) -> Self {
        self.responses.push((pattern.to_string(), response.to_string()));
        self
    }

    /// Queue a result returned by the next unmatched call.
    pub fn then(self, result: GenerationResult<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
        self
    }

    pub fn with_default(mut self, response: &str) -> Self {
        self.default_response = response.to_string();
        self
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        prompt: &str,
        tier: ModelTier,
        max_tokens: u32,
    ) -> GenerationResult<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                prompt: prompt.to_string(),
                tier,
                max_tokens,
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        for (pattern, response) in &self.responses {
            if prompt.contains(pattern.as_str()) {
                return Ok(response.clone());
            }
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(result) => result,
            None => Ok(self.default_response.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend() {
        let backend = MockBackend::new().with_response("lexer", "fn lex() {}");

        let response = backend.generate("grow the lexer", ModelTier::Swift, 64).await.unwrap();
        assert_eq!(response, "fn lex() {}");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls()[0].max_tokens, 64);
    }

    #[tokio::test]
    async fn test_mock_script_then_default() {
        let backend = MockBackend::new()
            .with_default("ok")
            .then(Err(GenerationError::RateLimited(5)))
            .then(Ok("second".into()));

        assert_eq!(
            backend.generate("p", ModelTier::Standard, 1).await,
            Err(GenerationError::RateLimited(5))
        );
        assert_eq!(backend.generate("p", ModelTier::Standard, 1).await.unwrap(), "second");
        assert_eq!(backend.generate("p", ModelTier::Standard, 1).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_health_check() {
        let down = MockBackend::new().then(Err(GenerationError::Unavailable("offline".into())));
        assert!(!down.health_check().await);
        assert!(MockBackend::new().health_check().await);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GenerationError::RateLimited(1).is_retryable());
        assert!(GenerationError::Unavailable("x".into()).is_retryable());
        assert!(!GenerationError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_tier_models() {
        let models = TierModels::claude();
        assert!(models.for_tier(ModelTier::Premier).contains("opus"));
        assert_eq!(TierModels::uniform("m").for_tier(ModelTier::Swift), "m");
    }
}
