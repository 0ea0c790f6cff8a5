//! Error taxonomy shared across crates.
//!
//! Storage policy-guard violations (`NotFound`, `NoLocalContent`,
//! `UnsyncedRelease`) are contract violations by the caller. Salvage errors
//! are recovered per unit. Throttle denials are not errors at all and have
//! no variant here.

use crate::types::{StorageState, UnitId};
use thiserror::Error;

/// Errors raised by the storage shell and durable stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No durable ref and no local content: nothing to materialise.
    #[error("unit {0} has neither a remote ref nor local content")]
    NotFound(UnitId),

    /// Commit or write requested on a unit without a local working copy.
    #[error("unit {0} has no local content")]
    NoLocalContent(UnitId),

    /// Release requested while local content is not checkpointed.
    #[error("refusing to release unit {unit}: storage state is {state}, not synced")]
    UnsyncedRelease { unit: UnitId, state: StorageState },

    /// The durable store rejected or failed an operation.
    #[error("durable store error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this error is a policy-guard violation rather than an
    /// environmental failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_)
                | StorageError::NoLocalContent(_)
                | StorageError::UnsyncedRelease { .. }
        )
    }
}

/// Errors raised while extracting proteins from a failing unit.
///
/// Non-fatal: the unit is still removed, it just yields nothing.
#[derive(Debug, Error)]
pub enum SalvageError {
    #[error("extraction failed for unit {unit}: {reason}")]
    ExtractionFailed { unit: UnitId, reason: String },
}

/// Blueprint validation and loading errors.
#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("blueprint name cannot be empty")]
    EmptyName,

    /// The name would not map to exactly one directory under the work root.
    #[error("blueprint name {0:?} must be a single plain path component")]
    InvalidName(String),

    #[error("blueprint {0} has an empty purpose")]
    EmptyPurpose(String),

    #[error("blueprint {0} must declare at least one success criterion")]
    NoCriteria(String),

    #[error("failed to parse blueprint: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_violations_are_flagged() {
        let id = UnitId::new("u");
        assert!(StorageError::NotFound(id.clone()).is_contract_violation());
        assert!(StorageError::UnsyncedRelease {
            unit: id,
            state: StorageState::Unsynced
        }
        .is_contract_violation());
        assert!(!StorageError::Backend("down".into()).is_contract_violation());
    }

    #[test]
    fn messages_name_the_unit() {
        let err = StorageError::UnsyncedRelease {
            unit: UnitId::new("lexer"),
            state: StorageState::Local,
        };
        assert_eq!(
            err.to_string(),
            "refusing to release unit lexer: storage state is local, not synced"
        );
    }
}
