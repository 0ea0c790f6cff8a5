//! Brood Runtime Prelude: convenient imports for common usage.
//!
//! ```rust
//! use brood_runtime::prelude::*;
//! ```

// Orchestrator and its reports
pub use crate::orchestrator::{
    CycleSummary, Orchestrator, OrchestratorBuilder, ShutdownHandle, StepOutcome, StepReport,
};

// Engines
pub use crate::allocator::{can_call, Allocation, Allocator, ScheduleEntry};
pub use crate::diffusion::{
    AdaptError, DiffusionEngine, HeatExchange, ModelAdapter, PatternAdapter, TemplateAdapter,
};
pub use crate::selection::{FailureReason, SalvageReport, SelectionEngine};
pub use crate::validate::{CriteriaValidator, Validator};

// Registry, pool and persistence
pub use crate::persist::{PersistError, PopulationState, StateMetadata};
pub use crate::pool::ProteinPool;
pub use crate::population::{GroupSummary, Population, UnitCell, UnitSummary};

// Storage
pub use crate::storage::{
    CheckpointReport, DurableStore, GitStore, MemoryStore, StorageShell, StorageStats,
};

// Configuration and errors
pub use crate::config::{AdapterKind, BroodConfig, ConfigError, ExtractorKind, StoreKind};
pub use crate::error::{BroodError, BroodResult, PopulationError};

// Re-export from core
pub use brood_core::prelude::*;
