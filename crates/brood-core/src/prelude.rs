//! Convenience re-exports.

#[cfg(feature = "ast")]
pub use crate::ast::AstExtractor;
pub use crate::content::ContentTree;
pub use crate::error::{BlueprintError, SalvageError, StorageError};
pub use crate::fragment::{Fragment, FragmentExtractor, QualityBar, RuleExtractor};
pub use crate::group::Group;
pub use crate::protein::{Origin, Protein, ProteinKind};
pub use crate::temperature::TemperatureWeights;
pub use crate::types::{Language, ModelTier, RefId, Stage, StorageState, UnitId};
pub use crate::unit::{Unit, UnitBlueprint, UnitEvent, UnitEventKind, Validation, ValidationOutcome};
