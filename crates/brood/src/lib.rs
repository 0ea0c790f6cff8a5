//! # Brood
//!
//! An orchestrator that grows a population of code modules in parallel.
//!
//! Each *unit* is a module under development. Units are organised into
//! *groups* of siblings, advance through six ordered stages, and are served
//! by a generation backend in priority order under a per-unit throttle.
//! Warm units share heat and tested fragments with cold siblings; units
//! that fail are salvaged into reusable *proteins* that survivors pull in
//! when they declare a matching capability. Unit content moves between a
//! durable store and a local working area on demand.
//!
//! ## Quick Start
//!
//! ```rust
//! use brood::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> BroodResult<()> {
//! let work = tempfile::tempdir().unwrap();
//! let mut config = BroodConfig::default();
//! config.storage.work_root = work.path().to_path_buf();
//!
//! let orchestrator = Orchestrator::builder().with_config(config).build().await?;
//! orchestrator.create_group("parsers").await?;
//! orchestrator
//!     .create_unit(
//!         "parsers",
//!         UnitBlueprint::new("lexer", "Tokenize source text").with_criterion("handles whitespace"),
//!     )
//!     .await?;
//!
//! let summary = orchestrator.run_cycle().await;
//! assert_eq!(summary.cycle, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`brood_core`] - Units, stages, proteins, groups, blueprints and the error taxonomy
//! - [`brood_llm`] - Generation backends and prompt templates
//! - [`brood_runtime`] - Storage shell, allocator, diffusion, salvage, orchestrator
//!
//! ## Features
//!
//! - `api`: Claude backend
//! - `local`: Ollama backend
//! - `ast`: tree-sitter fragment extraction (`diffusion.extractor = "ast"`)
//! - `full`: all of the above

pub use brood_core as core;
pub use brood_llm as llm;
pub use brood_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust
/// use brood::prelude::*;
/// ```
pub mod prelude {
    pub use brood_runtime::prelude::*;

    pub use brood_llm::{
        extract_code, GenerationBackend, GenerationError, GenerationResult, MockBackend, TierModels,
    };

    #[cfg(feature = "local")]
    pub use brood_llm::OllamaBackend;

    #[cfg(feature = "api")]
    pub use brood_llm::ClaudeBackend;
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
