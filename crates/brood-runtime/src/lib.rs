//! # Brood Runtime
//!
//! Scheduling, diffusion, salvage and storage virtualization for a
//! population of units.
//!
//! The [`Orchestrator`](orchestrator::Orchestrator) owns the population,
//! the protein pool and every engine. Each subsystem receives handles to
//! what it needs; nothing lives in module-level state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brood_runtime::prelude::*;
//!
//! # async fn demo() -> BroodResult<()> {
//! let orchestrator = Orchestrator::builder()
//!     .with_state(".brood/state.json")
//!     .build()
//!     .await?;
//! orchestrator.create_group("parsers").await?;
//! let blueprint = UnitBlueprint::new("lexer", "Tokenize source text")
//!     .with_criterion("handles whitespace");
//! orchestrator.create_unit("parsers", blueprint).await?;
//! let summary = orchestrator.run_cycle().await;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod diffusion;
pub mod error;
pub mod orchestrator;
pub mod persist;
pub mod pool;
pub mod population;
pub mod prelude;
pub mod selection;
pub mod storage;
pub mod validate;
