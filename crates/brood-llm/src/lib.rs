//! # Brood LLM
//!
//! The generation-service boundary for the brood orchestrator.
//!
//! A backend turns a prompt into text under a model tier and a token budget.
//! The orchestrator never depends on a particular provider; it only sees
//! [`GenerationBackend`] and the three [`GenerationError`] outcomes.
//!
//! ## Features
//!
//! - `api`: Cloud API backend (Claude)
//! - `local`: Local backend (Ollama)
//! - `full`: All backends
//!
//! ## Usage
//!
//! ```rust
//! use brood_llm::{extract_code, MockBackend};
//!
//! let backend = MockBackend::new().with_response("lexer", "pub fn lex() {}");
//! assert_eq!(backend.call_count(), 0);
//! assert_eq!(extract_code("pub fn lex() {}\n").unwrap(), "pub fn lex() {}");
//! ```

mod backend;
mod prompt;

pub use backend::{
    GenerationBackend, GenerationError, GenerationResult, MockBackend, MockCall, TierModels,
};
pub use prompt::{extract_code, render, AdaptPrompt, EvolutionPrompt, PromptTemplate};

#[cfg(feature = "local")]
mod ollama;
#[cfg(feature = "local")]
pub use ollama::OllamaBackend;

#[cfg(feature = "api")]
mod claude;
#[cfg(feature = "api")]
pub use claude::ClaudeBackend;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{GenerationBackend, GenerationError, GenerationResult, MockBackend};
    pub use crate::{AdaptPrompt, EvolutionPrompt, PromptTemplate};

    #[cfg(feature = "local")]
    pub use crate::OllamaBackend;

    #[cfg(feature = "api")]
    pub use crate::ClaudeBackend;
}
