//! Runtime configuration (`brood.toml`).
//!
//! Every numeric threshold the engines use is a policy knob here, with the
//! defaults the system has always shipped with.

use brood_core::fragment::QualityBar;
use brood_core::temperature::TemperatureWeights;
use brood_core::types::{ModelTier, Stage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroodConfig {
    #[serde(default)]
    pub temperature: TemperatureWeights,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub diffusion: DiffusionConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Base allocation for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAllocation {
    pub stage: Stage,
    pub tier: ModelTier,
    pub interval_secs: u64,
    pub max_tokens: u32,
    pub priority: f64,
}

impl StageAllocation {
    fn row(stage: Stage, tier: ModelTier, interval_secs: u64, max_tokens: u32, priority: f64) -> Self {
        Self { stage, tier, interval_secs, max_tokens, priority }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    #[serde(default = "default_stage_table")]
    pub stages: Vec<StageAllocation>,
    #[serde(default = "default_large_size")]
    pub large_size_bytes: usize,
    #[serde(default = "default_large_multiplier")]
    pub large_multiplier: f64,
    #[serde(default = "default_huge_size")]
    pub huge_size_bytes: usize,
    #[serde(default = "default_huge_multiplier")]
    pub huge_multiplier: f64,
    #[serde(default = "default_upgrade_fitness")]
    pub upgrade_fitness: f64,
    #[serde(default = "default_bonus_per_contribution")]
    pub bonus_per_contribution: f64,
    #[serde(default = "default_max_quality_bonus")]
    pub max_quality_bonus: f64,
    #[serde(default = "default_max_priority")]
    pub max_priority: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffusionConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_transfer_fraction")]
    pub transfer_fraction: f64,
    #[serde(default = "default_max_patterns")]
    pub max_patterns_per_exchange: usize,
    #[serde(default = "default_max_fragment_lines")]
    pub max_fragment_lines: usize,
    #[serde(default = "default_max_external_deps")]
    pub max_external_deps: usize,
    #[serde(default = "default_require_tests")]
    pub require_tests: bool,
    #[serde(default)]
    pub extractor: ExtractorKind,
    #[serde(default)]
    pub adapter: AdapterKind,
    #[serde(default = "default_adapter_tier")]
    pub adapter_tier: ModelTier,
    #[serde(default = "default_adapter_max_tokens")]
    pub adapter_max_tokens: u32,
}

/// How fragments are located in unit content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Line and brace scanning, always available.
    #[default]
    Rule,
    /// tree-sitter parse; needs the `ast` feature.
    Ast,
}

/// How an adopted fragment is rewritten for its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    #[default]
    Template,
    /// Rewrite through the generation backend.
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_low_fitness")]
    pub low_fitness: f64,
    #[serde(default = "default_min_development_cycles")]
    pub min_development_cycles: u64,
    #[serde(default = "default_cold_temperature")]
    pub cold_temperature: f64,
    #[serde(default = "default_stall_ceiling")]
    pub stall_ceiling: u32,
    #[serde(default = "default_seed_cycle_limit")]
    pub seed_cycle_limit: u64,
    #[serde(default = "default_acceptance_fitness")]
    pub acceptance_fitness: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Git,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default = "default_git_root")]
    pub git_root: PathBuf,
    #[serde(default = "default_idle_release_secs")]
    pub idle_release_secs: u64,
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_auto_release")]
    pub auto_release: bool,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

// Default value functions
fn default_stage_table() -> Vec<StageAllocation> {
    use ModelTier::*;
    vec![
        StageAllocation::row(Stage::Seed, Swift, 5, 1024, 1.0),
        StageAllocation::row(Stage::Early, Swift, 10, 2048, 2.0),
        StageAllocation::row(Stage::MidForm, Standard, 30, 4096, 4.0),
        StageAllocation::row(Stage::LateForm, Advanced, 60, 4096, 6.0),
        StageAllocation::row(Stage::Refining, Advanced, 120, 8192, 7.0),
        StageAllocation::row(Stage::Mature, Premier, 300, 8192, 10.0),
    ]
}
fn default_large_size() -> usize { 1000 }
fn default_large_multiplier() -> f64 { 1.2 }
fn default_huge_size() -> usize { 5000 }
fn default_huge_multiplier() -> f64 { 1.5 }
fn default_upgrade_fitness() -> f64 { 0.7 }
fn default_bonus_per_contribution() -> f64 { 0.1 }
fn default_max_quality_bonus() -> f64 { 2.0 }
fn default_max_priority() -> f64 { 10.0 }
fn default_threshold() -> f64 { 30.0 }
fn default_transfer_fraction() -> f64 { 0.25 }
fn default_max_patterns() -> usize { 3 }
fn default_max_fragment_lines() -> usize { 80 }
fn default_max_external_deps() -> usize { 2 }
fn default_require_tests() -> bool { true }
fn default_adapter_tier() -> ModelTier { ModelTier::Swift }
fn default_adapter_max_tokens() -> u32 { 1024 }
fn default_low_fitness() -> f64 { 0.2 }
fn default_min_development_cycles() -> u64 { 5 }
fn default_cold_temperature() -> f64 { 10.0 }
fn default_stall_ceiling() -> u32 { 20 }
fn default_seed_cycle_limit() -> u64 { 100 }
fn default_acceptance_fitness() -> f64 { 0.9 }
fn default_work_root() -> PathBuf { PathBuf::from(".brood/work") }
fn default_git_root() -> PathBuf { PathBuf::from(".brood/store") }
fn default_idle_release_secs() -> u64 { 24 * 60 * 60 }
fn default_commit_retries() -> u32 { 3 }
fn default_workers() -> usize { 4 }
fn default_auto_release() -> bool { true }
fn default_state_file() -> PathBuf { PathBuf::from(".brood/state.json") }

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            stages: default_stage_table(),
            large_size_bytes: default_large_size(),
            large_multiplier: default_large_multiplier(),
            huge_size_bytes: default_huge_size(),
            huge_multiplier: default_huge_multiplier(),
            upgrade_fitness: default_upgrade_fitness(),
            bonus_per_contribution: default_bonus_per_contribution(),
            max_quality_bonus: default_max_quality_bonus(),
            max_priority: default_max_priority(),
        }
    }
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            transfer_fraction: default_transfer_fraction(),
            max_patterns_per_exchange: default_max_patterns(),
            max_fragment_lines: default_max_fragment_lines(),
            max_external_deps: default_max_external_deps(),
            require_tests: default_require_tests(),
            extractor: ExtractorKind::default(),
            adapter: AdapterKind::default(),
            adapter_tier: default_adapter_tier(),
            adapter_max_tokens: default_adapter_max_tokens(),
        }
    }
}

impl DiffusionConfig {
    /// The fragment filter shared by diffusion and salvage.
    pub fn quality_bar(&self) -> QualityBar {
        QualityBar {
            max_lines: self.max_fragment_lines,
            max_external_deps: self.max_external_deps,
            require_tests: self.require_tests,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            low_fitness: default_low_fitness(),
            min_development_cycles: default_min_development_cycles(),
            cold_temperature: default_cold_temperature(),
            stall_ceiling: default_stall_ceiling(),
            seed_cycle_limit: default_seed_cycle_limit(),
            acceptance_fitness: default_acceptance_fitness(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_root: default_work_root(),
            store: StoreKind::default(),
            git_root: default_git_root(),
            idle_release_secs: default_idle_release_secs(),
            commit_retries: default_commit_retries(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            auto_release: default_auto_release(),
            state_file: default_state_file(),
        }
    }
}

impl AllocatorConfig {
    /// Row for `stage`. Validation guarantees one row per stage.
    pub fn row(&self, stage: Stage) -> Option<&StageAllocation> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

impl BroodConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BroodConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Default config as a TOML string.
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&BroodConfig::default())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !self.temperature.is_valid() {
            return invalid("temperature weights must all be positive".into());
        }

        let alloc = &self.allocator;
        if alloc.stages.len() != Stage::ALL.len() {
            return invalid(format!(
                "allocator.stages needs {} rows, found {}",
                Stage::ALL.len(),
                alloc.stages.len()
            ));
        }
        for (row, stage) in alloc.stages.iter().zip(Stage::ALL) {
            if row.stage != stage {
                return invalid(format!("allocator.stages row for {} is out of order", row.stage));
            }
        }
        for pair in alloc.stages.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if hi.tier < lo.tier || hi.max_tokens < lo.max_tokens || hi.priority < lo.priority {
                return invalid(format!(
                    "allocator.stages must not decrease from {} to {}",
                    lo.stage, hi.stage
                ));
            }
        }
        if alloc.large_size_bytes > alloc.huge_size_bytes {
            return invalid("allocator.large_size_bytes exceeds huge_size_bytes".into());
        }
        if alloc.large_multiplier < 1.0 || alloc.huge_multiplier < alloc.large_multiplier {
            return invalid("allocator size multipliers must be >= 1 and non-decreasing".into());
        }
        if alloc.max_quality_bonus < 0.0 || alloc.bonus_per_contribution < 0.0 {
            return invalid("allocator quality bonus must not be negative".into());
        }

        let diff = &self.diffusion;
        if !(diff.transfer_fraction > 0.0 && diff.transfer_fraction <= 0.5) {
            return invalid("diffusion.transfer_fraction must be in (0, 0.5]".into());
        }
        if !(0.0..100.0).contains(&diff.threshold) {
            return invalid("diffusion.threshold must be in [0, 100)".into());
        }
        if diff.extractor == ExtractorKind::Ast && !cfg!(feature = "ast") {
            return invalid("diffusion.extractor = \"ast\" needs the ast feature".into());
        }

        let sel = &self.selection;
        if !(0.0..=1.0).contains(&sel.low_fitness) || !(0.0..=1.0).contains(&sel.acceptance_fitness) {
            return invalid("selection fitness thresholds must be in [0, 1]".into());
        }

        if self.orchestrator.workers == 0 {
            return invalid("orchestrator.workers must be at least 1".into());
        }
        Ok(())
    }
}
