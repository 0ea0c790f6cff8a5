//! Selection and salvage: judging failing units and recycling what they got right.
//!
//! A unit is failing when any one of several independent signals fires.
//! Salvage is destructive: the unit's qualifying fragments become proteins
//! in the shared pool, then the unit leaves its group, the population, and
//! its storage is discarded whatever its sync state.

use crate::config::{DiffusionConfig, SelectionConfig};
use crate::pool::ProteinPool;
use crate::population::Population;
use crate::storage::StorageShell;
use brood_core::content::ContentTree;
use brood_core::error::SalvageError;
use brood_core::fragment::{FragmentExtractor, QualityBar};
use brood_core::protein::Protein;
use brood_core::types::{Stage, UnitId};
use brood_core::unit::Unit;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// One failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    LowFitness,
    Cold,
    Stalled,
    StuckAtSeed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::LowFitness => "low fitness",
            FailureReason::Cold => "cold",
            FailureReason::Stalled => "stalled",
            FailureReason::StuckAtSeed => "stuck at seed",
        };
        f.write_str(s)
    }
}

/// What salvaging one unit produced.
#[derive(Debug, Clone, Serialize)]
pub struct SalvageReport {
    pub unit: UnitId,
    pub group: String,
    pub reasons: Vec<FailureReason>,
    /// Names of the proteins added to the pool.
    pub proteins: Vec<String>,
    /// Extraction error, if salvage yielded nothing because of one.
    pub error: Option<String>,
}

pub struct SelectionEngine {
    config: SelectionConfig,
    bar: QualityBar,
    extractor: Arc<dyn FragmentExtractor>,
}

impl SelectionEngine {
    pub fn new(config: SelectionConfig, diffusion: &DiffusionConfig, extractor: Arc<dyn FragmentExtractor>) -> Self {
        Self {
            config,
            bar: diffusion.quality_bar(),
            extractor,
        }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Every failure signal currently firing for `unit`.
    ///
    /// Low fitness and coldness only count once the unit has had
    /// `min_development_cycles`; coldness also needs a measured temperature.
    pub fn failure_reasons(&self, unit: &Unit) -> Vec<FailureReason> {
        let cfg = &self.config;
        let developed = unit.cycles >= cfg.min_development_cycles;
        let mut reasons = Vec::new();

        if developed && unit.fitness < cfg.low_fitness {
            reasons.push(FailureReason::LowFitness);
        }
        if developed && unit.temperature.is_some_and(|t| t < cfg.cold_temperature) {
            reasons.push(FailureReason::Cold);
        }
        if unit.stalled_count > cfg.stall_ceiling {
            reasons.push(FailureReason::Stalled);
        }
        if unit.stage == Stage::Seed && unit.cycles > cfg.seed_cycle_limit {
            reasons.push(FailureReason::StuckAtSeed);
        }
        reasons
    }

    pub fn is_failing(&self, unit: &Unit) -> bool {
        !self.failure_reasons(unit).is_empty()
    }

    /// Extract proteins from a unit's content.
    pub fn salvage(&self, unit: &Unit, content: &ContentTree) -> Result<Vec<Protein>, SalvageError> {
        let fragments = self.extractor.extract(&unit.id, content)?;
        Ok(fragments
            .iter()
            .filter(|f| self.bar.admits(f))
            .map(|f| Protein::salvaged(&unit.id, f, &unit.blueprint.capabilities, self.bar.score(f)))
            .collect())
    }

    /// Salvage every failing unit of `group`.
    #[instrument(skip_all, fields(group = %group))]
    pub async fn cycle(
        &self,
        population: &Population,
        group: &str,
        storage: &StorageShell,
        pool: &RwLock<ProteinPool>,
    ) -> Vec<SalvageReport> {
        let mut reports = Vec::new();
        for cell in population.members(group).await {
            let reasons = {
                let unit = cell.unit.lock().await;
                self.failure_reasons(&unit)
            };
            if reasons.is_empty() {
                continue;
            }
            if let Some(report) = self.salvage_unit(population, &cell.id, reasons, storage, pool).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Salvage one unit regardless of its failure signals.
    ///
    /// Returns `None` when the unit is not in the population.
    pub async fn salvage_unit(
        &self,
        population: &Population,
        id: &UnitId,
        reasons: Vec<FailureReason>,
        storage: &StorageShell,
        pool: &RwLock<ProteinPool>,
    ) -> Option<SalvageReport> {
        let cell = population.remove(id).await?;
        let mut unit = cell.unit.lock().await;

        let mut error = None;
        let proteins = match storage.read_content(&mut unit).await {
            Ok(content) => match self.salvage(&unit, &content) {
                Ok(proteins) => proteins,
                Err(e) => {
                    warn!("Salvage of {} yielded nothing: {}", unit.id, e);
                    error = Some(e.to_string());
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Cannot read {} for salvage: {}", unit.id, e);
                error = Some(e.to_string());
                Vec::new()
            }
        };

        let mut names = Vec::new();
        {
            let mut pool = pool.write().await;
            for protein in proteins {
                let name = protein.name.clone();
                if pool.add(protein) {
                    names.push(name);
                }
            }
        }

        if let Err(e) = storage.discard(&unit).await {
            warn!("Discarding storage of {} failed: {}", unit.id, e);
        }

        let reason_list: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
        info!(
            "Salvaged {} from {} ({}): {} protein(s)",
            unit.id,
            unit.group,
            if reason_list.is_empty() { "requested".to_string() } else { reason_list.join(", ") },
            names.len()
        );

        Some(SalvageReport {
            unit: unit.id.clone(),
            group: unit.group.clone(),
            reasons,
            proteins: names,
            error,
        })
    }
}
