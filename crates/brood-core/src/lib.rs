//! # Brood Core
//!
//! Core types for the brood evolution orchestrator.
//!
//! A *unit* is a module under development. Units live in *groups*, move
//! forward through an ordered set of [`Stage`]s, carry a derived
//! *temperature* summarising their health, and keep their content in a
//! storage shell that is either materialised locally, checkpointed to a
//! durable store, or both.
//!
//! Units that fail are salvaged: self-contained fragments are extracted from
//! their content and kept as immutable [`Protein`]s that surviving units can
//! pull in when they declare a matching capability.
//!
//! ## Quick Start
//!
//! ```rust
//! use brood_core::prelude::*;
//!
//! let blueprint = UnitBlueprint::new("tokenizer", "Split source text into tokens")
//!     .with_criterion("handles unicode")
//!     .with_capability("lexing");
//! assert!(blueprint.validate().is_ok());
//! assert_eq!(Stage::Seed.next(), Some(Stage::Early));
//! ```

#[cfg(feature = "ast")]
pub mod ast;
pub mod content;
pub mod error;
pub mod fragment;
pub mod group;
pub mod prelude;
pub mod protein;
pub mod temperature;
pub mod types;
pub mod unit;
