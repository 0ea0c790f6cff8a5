//! Shared types used across all brood crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// Stable identifier of a unit, unique within a population.
///
/// Units are named by their blueprint, so the id is the name itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id names exactly one directory under a root.
    pub fn is_path_safe(&self) -> bool {
        plain_component(&self.0)
    }
}

/// A single normal path component: no separators, no `.`/`..`, not
/// hidden, no surrounding whitespace.
pub(crate) fn plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name.trim() == name
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Opaque pointer into the durable store (a commit id or content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(pub String);

impl RefId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(10) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle position of a unit. Strictly forward: no stage is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Seed,
    Early,
    MidForm,
    LateForm,
    Refining,
    Mature,
}

impl Stage {
    /// All stages in lifecycle order.
    pub const ALL: [Stage; 6] = [
        Stage::Seed,
        Stage::Early,
        Stage::MidForm,
        Stage::LateForm,
        Stage::Refining,
        Stage::Mature,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Fractional progress in [0, 1).
    pub fn progress(self) -> f64 {
        self.index() as f64 / Self::ALL.len() as f64
    }

    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn is_final(self) -> bool {
        self == Stage::Mature
    }

    /// What generation should concentrate on while a unit sits in this stage.
    pub fn focus(self) -> &'static str {
        match self {
            Stage::Seed => "Basic type and trait definitions. Keep it simple.",
            Stage::Early => "Method signatures and stubs. Rapid scaffolding.",
            Stage::MidForm => "Core logic implementation. This is critical.",
            Stage::LateForm => "Error handling and edge cases. Polish.",
            Stage::Refining => "Optimization and documentation. Refine.",
            Stage::Mature => "Final polish. Production-ready.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Seed => "seed",
            Stage::Early => "early",
            Stage::MidForm => "mid-form",
            Stage::LateForm => "late-form",
            Stage::Refining => "refining",
            Stage::Mature => "mature",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a unit's bytes currently live.
///
/// - `Remote`: only in the durable store.
/// - `Local`: materialised in the working area, not yet checkpointed.
/// - `Synced`: local copy identical to the durable ref.
/// - `Unsynced`: never committed, purely local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageState {
    Remote,
    Local,
    Synced,
    Unsynced,
}

impl StorageState {
    /// Whether a local working copy exists in this state.
    pub fn has_local(self) -> bool {
        !matches!(self, StorageState::Remote)
    }

    /// Whether a durable ref is current in this state.
    pub fn has_remote(self) -> bool {
        matches!(self, StorageState::Remote | StorageState::Synced)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageState::Remote => "remote",
            StorageState::Local => "local",
            StorageState::Synced => "synced",
            StorageState::Unsynced => "unsynced",
        }
    }
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tier of the generation model, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Swift,
    Standard,
    Advanced,
    Premier,
}

impl ModelTier {
    /// One tier up, saturating at `Premier`.
    pub fn upgrade(self) -> ModelTier {
        match self {
            ModelTier::Swift => ModelTier::Standard,
            ModelTier::Standard => ModelTier::Advanced,
            ModelTier::Advanced | ModelTier::Premier => ModelTier::Premier,
        }
    }

    /// Relative cost of one call.
    pub fn cost_factor(self) -> f64 {
        match self {
            ModelTier::Swift => 0.0,
            ModelTier::Standard => 0.5,
            ModelTier::Advanced => 1.0,
            ModelTier::Premier => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Swift => "swift",
            ModelTier::Standard => "standard",
            ModelTier::Advanced => "advanced",
            ModelTier::Premier => "premier",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source language a unit is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Rust,
    Python,
}

impl Language {
    /// Path of the main source file, relative to the unit root.
    pub fn main_file(self) -> &'static str {
        match self {
            Language::Rust => "src/lib.rs",
            Language::Python => "src/__init__.py",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "Rust",
            Language::Python => "Python",
        }
    }
}
