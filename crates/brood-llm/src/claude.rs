//! Claude backend for Anthropic API.
//!
//! Requires the `api` feature and an Anthropic API key.

use crate::backend::{GenerationBackend, GenerationError, GenerationResult, TierModels};
use async_trait::async_trait;
use brood_core::types::ModelTier;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude API request.
#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ClaudeMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Claude API response.
#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: String,
}

/// Claude backend for Anthropic API.
///
/// # Example
///
/// ```rust,ignore
/// use brood_llm::{ClaudeBackend, GenerationBackend};
///
/// let backend = ClaudeBackend::from_env()?;
/// let code = backend.generate(&prompt, ModelTier::Advanced, 4096).await?;
/// ```
pub struct ClaudeBackend {
    api_key: String,
    models: TierModels,
    temperature: f32,
    client: reqwest::Client,
}

impl ClaudeBackend {
    /// Create a new Claude backend.
    pub fn new(api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key: api_key.to_string(),
            models: TierModels::claude(),
            temperature: 0.2,
            client,
        }
    }

    /// Create from environment variable.
    pub fn from_env() -> GenerationResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| GenerationError::Unavailable("ANTHROPIC_API_KEY is not set".to_string()))?;
        Ok(Self::new(&api_key))
    }

    pub fn with_models(mut self, models: TierModels) -> Self {
        self.models = models;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl GenerationBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    async fn generate(
        &self,
        prompt: &str,
        tier: ModelTier,
        max_tokens: u32,
    ) -> GenerationResult<String> {
        let model = self.models.for_tier(tier);
        debug!(model, max_tokens, "claude request");

        let request = ClaudeRequest {
            model,
            max_tokens,
            messages: vec![ClaudeMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GenerationError::Unavailable("Cannot connect to Anthropic API".to_string())
                } else if e.is_timeout() {
                    GenerationError::Unavailable("request timed out".to_string())
                } else {
                    GenerationError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u32>().ok());
            let body = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                429 => GenerationError::RateLimited(retry_after.unwrap_or(60)),
                500..=599 => GenerationError::Unavailable(format!("Claude API error {}", status)),
                _ => GenerationError::InvalidResponse(format!("Claude API error {}: {}", status, body)),
            });
        }

        let resp: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        resp.content
            .into_iter()
            .map(|c| c.text)
            .find(|t| !t.is_empty())
            .ok_or_else(|| GenerationError::InvalidResponse("No content in response".to_string()))
    }
}
