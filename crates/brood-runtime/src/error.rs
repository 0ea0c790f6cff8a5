//! Runtime error types.

use crate::config::ConfigError;
use crate::persist::PersistError;
use brood_core::error::{BlueprintError, SalvageError, StorageError};
use brood_core::types::UnitId;
use thiserror::Error;

/// Administrative errors over the population registry.
#[derive(Debug, Error)]
pub enum PopulationError {
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("group {0} already exists")]
    GroupExists(String),

    #[error("group {group} still has {members} member(s)")]
    GroupNotEmpty { group: String, members: usize },

    #[error("unit {0} already exists")]
    DuplicateUnit(UnitId),

    #[error("unknown unit: {0}")]
    UnknownUnit(UnitId),

    #[error("unit {unit} is not ready for promotion: {reason}")]
    NotReady { unit: UnitId, reason: String },
}

/// Umbrella error for runtime entry points.
#[derive(Debug, Error)]
pub enum BroodError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Population(#[from] PopulationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    #[error(transparent)]
    Salvage(#[from] SalvageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BroodResult<T> = Result<T, BroodError>;
