//! Ollama backend for local generation.
//!
//! Requires the `local` feature and a running Ollama instance.

use crate::backend::{GenerationBackend, GenerationError, GenerationResult, TierModels};
use async_trait::async_trait;
use brood_core::types::ModelTier;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ollama API request.
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Ollama backend for local generation.
///
/// # Example
///
/// ```rust,ignore
/// use brood_llm::{OllamaBackend, GenerationBackend};
///
/// let backend = OllamaBackend::localhost();
/// let code = backend.generate(&prompt, ModelTier::Swift, 1024).await?;
/// ```
pub struct OllamaBackend {
    endpoint: String,
    models: TierModels,
    client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend.
    pub fn new(endpoint: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            models: TierModels::ollama(),
            client,
        }
    }

    /// Create with default localhost endpoint.
    pub fn localhost() -> Self {
        Self::new("http://localhost:11434")
    }

    pub fn with_models(mut self, models: TierModels) -> Self {
        self.models = models;
        self
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        prompt: &str,
        tier: ModelTier,
        max_tokens: u32,
    ) -> GenerationResult<String> {
        let model = self.models.for_tier(tier);
        debug!(model, max_tokens, "ollama request");

        let request = OllamaRequest {
            model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: 0.2,
                num_predict: max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.endpoint);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GenerationError::Unavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.endpoint
                    ))
                } else {
                    GenerationError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 404 {
                return Err(GenerationError::Unavailable(format!(
                    "Model '{}' not found. Run: ollama pull {}",
                    model, model
                )));
            }

            return Err(GenerationError::InvalidResponse(format!(
                "Ollama error {}: {}",
                status, body
            )));
        }

        let resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        Ok(resp.response)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);

        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalised() {
        let backend = OllamaBackend::new("http://localhost:11434/");
        assert_eq!(backend.endpoint, "http://localhost:11434");
    }

    #[test]
    fn test_uniform_models() {
        let backend = OllamaBackend::localhost().with_models(TierModels::uniform("codellama"));
        assert_eq!(backend.models.for_tier(ModelTier::Premier), "codellama");
    }
}
