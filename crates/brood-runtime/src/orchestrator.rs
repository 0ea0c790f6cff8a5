//! The orchestrator: one owner for the population, the protein pool and
//! every engine, running the development cycle.
//!
//! A cycle runs four phases in order:
//!
//! 1. diffusion inside every group,
//! 2. selection and salvage inside every group,
//! 3. prioritised generation over the surviving units, up to `workers` at a time,
//! 4. persistence and idle release.
//!
//! Each unit is locked for the whole of any mutation. Failures for one
//! unit are logged and counted; they never abort the cycle.

use crate::allocator::{Allocation, Allocator, ScheduleEntry};
use crate::config::{AdapterKind, BroodConfig, ExtractorKind, StoreKind};
use crate::diffusion::{
    append_block, defines, DiffusionEngine, HeatExchange, ModelAdapter, PatternAdapter, TemplateAdapter,
};
use crate::error::{BroodResult, PopulationError};
use crate::persist::PopulationState;
use crate::pool::ProteinPool;
use crate::population::{GroupSummary, Population, UnitCell, UnitSummary};
use crate::selection::{SalvageReport, SelectionEngine};
use crate::storage::{CheckpointReport, DurableStore, GitStore, MemoryStore, StorageShell, StorageStats};
use crate::validate::{CriteriaValidator, Validator};
use brood_core::content::ContentTree;
use brood_core::fragment::{FragmentExtractor, RuleExtractor};
use brood_core::group::Group;
use brood_core::protein::Protein;
use brood_core::types::{Language, StorageState, UnitId};
use brood_core::unit::{Unit, UnitBlueprint, UnitEventKind};
use brood_llm::{extract_code, render, EvolutionPrompt, GenerationBackend, MockBackend};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// How one development step ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Advanced,
    Improved,
    Stalled,
    Throttled,
    /// The backend failed or answered without code.
    GenerationFailed { retryable: bool },
    /// Materialize, read or write failed before anything was applied.
    StorageFailed,
    /// Shutdown arrived first; nothing was applied.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub unit: UnitId,
    pub outcome: StepOutcome,
    /// Commit retries were exhausted after applying the step.
    pub degraded: bool,
}

impl StepReport {
    fn new(unit: &UnitId, outcome: StepOutcome) -> Self {
        Self {
            unit: unit.clone(),
            outcome,
            degraded: false,
        }
    }
}

/// Per-cycle counts for operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub advanced: usize,
    pub improved: usize,
    pub stalled: usize,
    pub salvaged: usize,
    pub generation_errors: usize,
    pub throttled: usize,
    pub storage_errors: usize,
    pub degraded: usize,
    pub cancelled: usize,
    pub exchanges: usize,
    pub proteins_harvested: usize,
}

impl CycleSummary {
    fn tally(&mut self, steps: &[StepReport]) {
        for step in steps {
            match step.outcome {
                StepOutcome::Advanced => self.advanced += 1,
                StepOutcome::Improved => self.improved += 1,
                StepOutcome::Stalled => self.stalled += 1,
                StepOutcome::Throttled => self.throttled += 1,
                StepOutcome::GenerationFailed { .. } => self.generation_errors += 1,
                StepOutcome::StorageFailed => self.storage_errors += 1,
                StepOutcome::Cancelled => self.cancelled += 1,
            }
            if step.degraded {
                self.degraded += 1;
            }
        }
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} advanced, {} improved, {} stalled, {} salvaged, {} generation error(s), \
             {} throttled, {} degraded, {} exchange(s), {} protein(s) harvested",
            self.cycle,
            self.advanced,
            self.improved,
            self.stalled,
            self.salvaged,
            self.generation_errors,
            self.throttled,
            self.degraded,
            self.exchanges,
            self.proteins_harvested,
        )
    }
}

/// Asks a running orchestrator to stop. In-flight generation calls are
/// abandoned and leave their units untouched.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: BroodConfig,
    backend: Option<Arc<dyn GenerationBackend>>,
    validator: Option<Arc<dyn Validator>>,
    store: Option<Arc<dyn DurableStore>>,
    extractor: Option<Arc<dyn FragmentExtractor>>,
    adapter: Option<Arc<dyn PatternAdapter>>,
    state_path: Option<PathBuf>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: BroodConfig::default(),
            backend: None,
            validator: None,
            store: None,
            extractor: None,
            adapter: None,
            state_path: None,
        }
    }

    pub fn with_config(mut self, config: BroodConfig) -> Self {
        self.config = config;
        self
    }

    /// Generation backend. Defaults to [`MockBackend`].
    pub fn with_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Durable store. Defaults to whatever `storage.store` names.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FragmentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn PatternAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Persist to this state file, loading it on build if it exists.
    pub fn with_state<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.state_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub async fn build(self) -> BroodResult<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn DurableStore> = match self.store {
            Some(store) => store,
            None => match config.storage.store {
                StoreKind::Memory => Arc::new(MemoryStore::new()),
                StoreKind::Git => Arc::new(GitStore::open(config.storage.git_root.clone()).await?),
            },
        };
        let backend = self.backend.unwrap_or_else(|| Arc::new(MockBackend::new()));
        let extractor = self.extractor.unwrap_or_else(|| default_extractor(config.diffusion.extractor));
        let adapter: Arc<dyn PatternAdapter> = match self.adapter {
            Some(adapter) => adapter,
            None => match config.diffusion.adapter {
                AdapterKind::Template => Arc::new(TemplateAdapter),
                AdapterKind::Model => Arc::new(ModelAdapter::new(
                    Arc::clone(&backend),
                    config.diffusion.adapter_tier,
                    config.diffusion.adapter_max_tokens,
                )),
            },
        };
        debug!("Fragments via {} extractor, {} adapter", extractor.name(), adapter.name());

        let (population, pool) = match &self.state_path {
            Some(path) if path.exists() => {
                let state = PopulationState::load(path)?;
                info!("Loaded {} unit(s) from {}", state.metadata.unit_count, path.display());
                state.restore().await
            }
            _ => (Population::new(), ProteinPool::new()),
        };

        let (shutdown, _) = watch::channel(false);
        Ok(Orchestrator {
            allocator: Allocator::new(config.allocator.clone())?,
            diffusion: DiffusionEngine::new(config.diffusion.clone(), extractor.clone(), adapter),
            selection: SelectionEngine::new(config.selection.clone(), &config.diffusion, extractor),
            storage: StorageShell::new(store, config.storage.work_root.clone()),
            backend,
            validator: self.validator.unwrap_or_else(|| Arc::new(CriteriaValidator::new())),
            population,
            pool: RwLock::new(pool),
            state_path: self.state_path,
            shutdown: Arc::new(shutdown),
            config,
        })
    }
}

fn default_extractor(kind: ExtractorKind) -> Arc<dyn FragmentExtractor> {
    match kind {
        #[cfg(feature = "ast")]
        ExtractorKind::Ast => Arc::new(brood_core::ast::AstExtractor::new()),
        // Config validation rejects `ast` when the feature is off.
        _ => Arc::new(RuleExtractor::new()),
    }
}

pub struct Orchestrator {
    config: BroodConfig,
    population: Population,
    pool: RwLock<ProteinPool>,
    storage: StorageShell,
    allocator: Allocator,
    diffusion: DiffusionEngine,
    selection: SelectionEngine,
    backend: Arc<dyn GenerationBackend>,
    validator: Arc<dyn Validator>,
    state_path: Option<PathBuf>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &BroodConfig {
        &self.config
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn pool(&self) -> &RwLock<ProteinPool> {
        &self.pool
    }

    pub fn storage(&self) -> &StorageShell {
        &self.storage
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn diffusion(&self) -> &DiffusionEngine {
        &self.diffusion
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ---- cycle -------------------------------------------------------------

    /// Run one full cycle.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle = self.population.next_cycle();
        let mut summary = CycleSummary {
            cycle,
            ..Default::default()
        };

        let exchanges = self.diffuse_all().await;
        summary.exchanges = exchanges.len();

        let salvaged = self.select_all().await;
        summary.salvaged = salvaged.len();
        summary.proteins_harvested = salvaged.iter().map(|r| r.proteins.len()).sum();

        let steps = self.generate_all().await;
        summary.tally(&steps);

        if self.config.orchestrator.auto_release {
            let idle = std::time::Duration::from_secs(self.config.storage.idle_release_secs);
            let idle = chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::MAX);
            self.storage.auto_release_idle(&self.population, Utc::now(), idle).await;
        }
        if let Err(e) = self.persist().await {
            warn!("Persisting state after cycle {} failed: {}", cycle, e);
        }

        info!("{}", summary);
        summary
    }

    /// Run up to `cycles` cycles, stopping early on shutdown.
    pub async fn run(&self, cycles: u64) -> Vec<CycleSummary> {
        let mut summaries = Vec::new();
        for _ in 0..cycles {
            if self.is_shutdown() {
                info!("Shutdown requested, stopping after {} cycle(s)", summaries.len());
                break;
            }
            summaries.push(self.run_cycle().await);
        }
        summaries
    }

    /// Diffusion inside every group.
    pub async fn diffuse_all(&self) -> Vec<HeatExchange> {
        let mut exchanges = Vec::new();
        for group in self.population.group_names().await {
            let members = self.population.members(&group).await;
            if members.len() < 2 {
                continue;
            }
            exchanges.extend(self.diffusion.run_cycle(&members, &self.storage).await);
        }
        exchanges
    }

    /// Selection and salvage inside every group.
    pub async fn select_all(&self) -> Vec<SalvageReport> {
        let mut reports = Vec::new();
        for group in self.population.group_names().await {
            reports.extend(
                self.selection
                    .cycle(&self.population, &group, &self.storage, &self.pool)
                    .await,
            );
        }
        reports
    }

    /// The current service order over every unit.
    pub async fn schedule(&self) -> Vec<ScheduleEntry> {
        // Cells come back in id order, so locking them all cannot deadlock
        // against diffusion, which also locks in id order.
        let cells = self.population.cells().await;
        let mut units = Vec::with_capacity(cells.len());
        for cell in &cells {
            units.push(cell.unit.lock().await);
        }
        self.allocator.schedule(units.iter().map(|u| &**u))
    }

    /// The unit that would be served first right now, skipping throttled ones.
    pub async fn next_eligible(&self) -> Option<UnitId> {
        let schedule = self.schedule().await;
        let last_calls: HashMap<UnitId, Instant> = self
            .population
            .cells()
            .await
            .iter()
            .filter_map(|cell| cell.last_call().map(|at| (cell.id.clone(), at)))
            .collect();
        self.allocator.next_eligible(&schedule, &last_calls, Instant::now())
    }

    /// One generation step for every unit, in priority order.
    ///
    /// Units translating a partner run in a second wave, after every lead
    /// has had its step.
    pub async fn generate_all(&self) -> Vec<StepReport> {
        let mut leads = Vec::new();
        let mut followers = Vec::new();
        for entry in self.schedule().await {
            if let Some(cell) = self.population.get(&entry.id).await {
                if cell.unit.lock().await.follows_partner() {
                    followers.push((cell, entry.allocation));
                } else {
                    leads.push((cell, entry.allocation));
                }
            }
        }

        let workers = self.config.orchestrator.workers.max(1);
        let reports = Mutex::new(Vec::with_capacity(leads.len() + followers.len()));
        for wave in [leads, followers] {
            stream::iter(wave)
                .for_each_concurrent(workers, |(cell, allocation)| {
                    let reports = &reports;
                    async move {
                        let report = self.develop(&cell, &allocation).await;
                        reports.lock().await.push(report);
                    }
                })
                .await;
        }
        reports.into_inner()
    }

    /// Intent of the partner a follower translates, from the partner's
    /// current content.
    async fn partner_intent(&self, cell: &UnitCell) -> Option<(UnitId, String)> {
        let partner = {
            let unit = cell.unit.lock().await;
            if !unit.follows_partner() {
                return None;
            }
            unit.partner.clone()?
        };
        let Some(lead) = self.population.get(&partner).await else {
            debug!("Partner {} of {} is gone, developing alone", partner, cell.id);
            return None;
        };
        let mut lead = lead.unit.lock().await;
        let language = lead.blueprint.language;
        match self.storage.read_content(&mut lead).await {
            Ok(tree) => {
                let intent = lead.intent(tree.main_source(language).unwrap_or_default());
                Some((partner, intent))
            }
            Err(e) => {
                warn!("Cannot read partner {} of {}: {}", partner, cell.id, e);
                None
            }
        }
    }

    /// One development step for one unit.
    ///
    /// The generated text is buffered and validated before anything is
    /// written, so cancellation or a failed call leaves the unit as it was.
    #[instrument(skip_all, fields(unit = %cell.id))]
    pub async fn develop(&self, cell: &UnitCell, allocation: &Allocation) -> StepReport {
        if self.is_shutdown() {
            return StepReport::new(&cell.id, StepOutcome::Cancelled);
        }
        if !cell.try_acquire(allocation.interval, Instant::now()) {
            let mut unit = cell.unit.lock().await;
            unit.throttle_skips += 1;
            unit.record(UnitEventKind::Throttled);
            debug!("Throttled {}", unit.id);
            return StepReport::new(&cell.id, StepOutcome::Throttled);
        }

        let partner_intent = self.partner_intent(cell).await;
        let mut unit = cell.unit.lock().await;
        if let Err(e) = self.storage.materialize(&mut unit).await {
            error!("Cannot materialize {}: {}", unit.id, e);
            return StepReport::new(&cell.id, StepOutcome::StorageFailed);
        }
        let mut tree = match self.storage.read_content(&mut unit).await {
            Ok(tree) => tree,
            Err(e) => {
                error!("Cannot read {}: {}", unit.id, e);
                return StepReport::new(&cell.id, StepOutcome::StorageFailed);
            }
        };

        let language = unit.blueprint.language;
        let (carried, proteins): (Vec<Protein>, Vec<Protein>) = {
            let pool = self.pool.read().await;
            let carried = unit
                .absorbed_proteins
                .iter()
                .filter_map(|name| pool.get(name))
                .cloned()
                .collect();
            let fresh = pool
                .matching(&unit.id, &unit.blueprint.dependency_names, &unit.absorbed_proteins)
                .into_iter()
                .cloned()
                .collect();
            (carried, fresh)
        };
        let current = tree.main_source(language).unwrap_or_default().to_string();
        let mut prompt =
            EvolutionPrompt::for_unit(&unit, allocation.tier, allocation.max_tokens, allocation.priority)
                .with_source(current);
        if let Some((partner, intent)) = partner_intent {
            prompt = prompt.with_partner_intent(partner.as_str(), intent);
        }
        let prompt = render(&prompt);

        let response = tokio::select! {
            response = self.backend.generate(&prompt, allocation.tier, allocation.max_tokens) => response,
            _ = stopped(self.shutdown.subscribe()) => {
                info!("Generation for {} cancelled", unit.id);
                return StepReport::new(&cell.id, StepOutcome::Cancelled);
            }
        };

        let code = match response.and_then(|text| extract_code(&text)) {
            Ok(code) => code,
            Err(e) => {
                warn!("Generation for {} failed: {}", unit.id, e);
                let retryable = e.is_retryable();
                unit.record(UnitEventKind::GenerationFailed { reason: e.to_string() });
                return StepReport::new(&cell.id, StepOutcome::GenerationFailed { retryable });
            }
        };

        let main = graft(code, carried.iter().chain(&proteins), &unit.adopted_patterns);
        tree.set_main_source(language, main);

        let validation = self.validator.validate(&unit, &tree).await;
        if let Err(e) = self.storage.write_content(&mut unit, &tree).await {
            error!("Cannot write {}: {}", unit.id, e);
            return StepReport::new(&cell.id, StepOutcome::StorageFailed);
        }

        unit.cycles += 1;
        unit.record(UnitEventKind::Generated {
            tier: allocation.tier,
            max_tokens: allocation.max_tokens,
        });
        for protein in &proteins {
            unit.absorbed_proteins.insert(protein.name.clone());
            unit.record(UnitEventKind::ProteinAbsorbed { name: protein.name.clone() });
        }
        let applied = unit.apply_validation(&validation, &self.config.temperature);
        let outcome = if applied.advanced {
            info!("{} advanced to {}", unit.id, unit.stage);
            StepOutcome::Advanced
        } else if applied.improved {
            StepOutcome::Improved
        } else {
            StepOutcome::Stalled
        };

        let degraded = !self.commit_with_retry(&mut unit).await;
        StepReport {
            unit: cell.id.clone(),
            outcome,
            degraded,
        }
    }

    /// Commit with bounded retries. On exhaustion the unit is flagged
    /// degraded and keeps its local content.
    async fn commit_with_retry(&self, unit: &mut Unit) -> bool {
        let attempts = self.config.storage.commit_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.storage.commit(unit).await {
                Ok(_) => return true,
                Err(e) if e.is_contract_violation() => {
                    error!("Commit of {} violated a storage guard: {}", unit.id, e);
                    last_error = e.to_string();
                    break;
                }
                Err(e) => {
                    warn!("Commit of {} failed (attempt {}/{}): {}", unit.id, attempt, attempts, e);
                    last_error = e.to_string();
                }
            }
        }
        unit.degraded = true;
        unit.record(UnitEventKind::Degraded { reason: last_error });
        false
    }

    /// Save population and pool to the state file, if one is configured.
    pub async fn persist(&self) -> BroodResult<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let pool = self.pool.read().await;
        PopulationState::capture(&self.population, &pool).await.save(path)?;
        Ok(())
    }

    // ---- administration ----------------------------------------------------

    pub async fn create_group(&self, name: &str) -> BroodResult<()> {
        self.population.create_group(name).await?;
        info!("Created group {}", name);
        Ok(())
    }

    pub async fn remove_group(&self, name: &str) -> BroodResult<Group> {
        let group = self.population.remove_group(name).await?;
        info!("Removed group {}", name);
        Ok(group)
    }

    /// Create a unit from a blueprint and seed its main source file.
    pub async fn create_unit(&self, group: &str, blueprint: UnitBlueprint) -> BroodResult<UnitId> {
        blueprint.validate()?;
        let id = UnitId::new(blueprint.name.clone());
        self.check_new(group, &[&id]).await?;
        self.spawn(group, blueprint, None).await?;
        info!("Created unit {} in {}", id, group);
        Ok(id)
    }

    /// Create a dual-language pair from one blueprint: a Python lead
    /// `<name>-py` and a Rust follower `<name>-rs` that translates it.
    pub async fn create_pair(&self, group: &str, blueprint: UnitBlueprint) -> BroodResult<(UnitId, UnitId)> {
        blueprint.validate()?;
        let half = |suffix: &str, language: Language| {
            let mut half = blueprint.clone();
            half.name = format!("{}-{}", blueprint.name, suffix);
            half.language = language;
            half
        };
        let lead = half("py", Language::Python);
        let follower = half("rs", Language::Rust);
        lead.validate()?;
        follower.validate()?;

        let lead_id = UnitId::new(lead.name.clone());
        let follower_id = UnitId::new(follower.name.clone());
        self.check_new(group, &[&lead_id, &follower_id]).await?;

        self.spawn(group, lead, Some(follower_id.clone())).await?;
        if let Err(e) = self.spawn(group, follower, Some(lead_id.clone())).await {
            self.population.remove(&lead_id).await;
            return Err(e);
        }
        info!("Created pair {} / {} in {}", lead_id, follower_id, group);
        Ok((lead_id, follower_id))
    }

    async fn check_new(&self, group: &str, ids: &[&UnitId]) -> BroodResult<()> {
        if self.population.group(group).await.is_none() {
            return Err(PopulationError::UnknownGroup(group.to_string()).into());
        }
        for id in ids {
            if self.population.get(id).await.is_some() {
                return Err(PopulationError::DuplicateUnit((*id).clone()).into());
            }
        }
        Ok(())
    }

    async fn spawn(&self, group: &str, blueprint: UnitBlueprint, partner: Option<UnitId>) -> BroodResult<UnitId> {
        let id = UnitId::new(blueprint.name.clone());
        let seed = seed_source(&blueprint);
        let language = blueprint.language;
        let mut unit = Unit::new(blueprint, group, self.storage.unit_dir(&id));
        unit.partner = partner;
        let tree = {
            let mut tree = ContentTree::new();
            tree.set_main_source(language, seed);
            tree
        };
        self.storage.initialize(&mut unit, &tree).await?;
        self.population.insert(unit).await?;
        Ok(id)
    }

    pub async fn list(&self) -> Vec<UnitSummary> {
        self.population.list().await
    }

    /// Group summaries with each group's allocation budget.
    pub async fn groups(&self) -> Vec<GroupSummary> {
        let mut summaries = self.population.group_summaries().await;
        for summary in &mut summaries {
            let members = self.population.members(&summary.name).await;
            let mut units = Vec::with_capacity(members.len());
            for cell in &members {
                units.push(cell.unit.lock().await);
            }
            summary.budget = self.allocator.group_budget(units.iter().map(|u| &**u));
        }
        summaries
    }

    /// Salvage a unit out of band, failing or not.
    pub async fn salvage(&self, id: &UnitId) -> BroodResult<SalvageReport> {
        let cell = self
            .population
            .get(id)
            .await
            .ok_or_else(|| PopulationError::UnknownUnit(id.clone()))?;
        let reasons = self.selection.failure_reasons(&*cell.unit.lock().await);
        self.selection
            .salvage_unit(&self.population, id, reasons, &self.storage, &self.pool)
            .await
            .ok_or_else(|| PopulationError::UnknownUnit(id.clone()).into())
    }

    pub async fn release(&self, id: &UnitId) -> BroodResult<()> {
        let cell = self
            .population
            .get(id)
            .await
            .ok_or_else(|| PopulationError::UnknownUnit(id.clone()))?;
        let mut unit = cell.unit.lock().await;
        self.storage.release(&mut unit).await?;
        info!("Released {}", id);
        Ok(())
    }

    pub async fn checkpoint(&self) -> CheckpointReport {
        let report = self.storage.checkpoint(&self.population).await;
        info!(
            "Checkpoint: {} committed, {} failed",
            report.committed.len(),
            report.failed.len()
        );
        report
    }

    /// Take a mature, accepted unit out of the population.
    pub async fn promote(&self, id: &UnitId) -> BroodResult<Unit> {
        let cell = self
            .population
            .get(id)
            .await
            .ok_or_else(|| PopulationError::UnknownUnit(id.clone()))?;
        let promoted = {
            let mut unit = cell.unit.lock().await;
            let acceptance = self.config.selection.acceptance_fitness;
            if !unit.is_mature() {
                return Err(PopulationError::NotReady {
                    unit: id.clone(),
                    reason: format!("stage is {}, not mature", unit.stage),
                }
                .into());
            }
            if unit.fitness < acceptance {
                return Err(PopulationError::NotReady {
                    unit: id.clone(),
                    reason: format!("fitness {:.2} is below {:.2}", unit.fitness, acceptance),
                }
                .into());
            }
            if matches!(unit.storage_state(), StorageState::Local | StorageState::Unsynced) {
                self.storage.commit(&mut unit).await?;
            }
            unit.clone()
        };
        self.population.remove(id).await;
        info!("Promoted {} with fitness {:.2}", id, promoted.fitness);
        Ok(promoted)
    }

    pub async fn stats(&self) -> StorageStats {
        self.storage.stats(&self.population).await
    }

    /// Import authored proteins from a file or a directory of files.
    pub async fn import_proteins(&self, path: &Path) -> BroodResult<usize> {
        let mut pool = self.pool.write().await;
        let added = if path.is_dir() {
            pool.load_dir(path)?
        } else {
            let text = std::fs::read_to_string(path)?;
            usize::from(pool.add(Protein::parse(&text)))
        };
        info!("Imported {} protein(s) from {}", added, path.display());
        Ok(added)
    }

    pub async fn prune_protein(&self, name: &str) -> Option<Protein> {
        self.pool.write().await.prune(name)
    }
}

/// Resolves once shutdown has been requested.
async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Re-apply what a unit has taken in, the proteins it absorbed and the
/// patterns it adopted, unless the fresh code already carries them.
fn graft<'a>(
    code: String,
    proteins: impl IntoIterator<Item = &'a Protein>,
    patterns: &BTreeMap<String, String>,
) -> String {
    let mut main = code;
    for protein in proteins {
        if !main.contains(protein.payload.trim()) {
            main = protein.inject_into(&main);
        }
    }
    for (name, adapted) in patterns {
        if !defines(&main, name) {
            main = append_block(&main, adapted);
        }
    }
    main
}

fn seed_source(blueprint: &UnitBlueprint) -> String {
    let prefix = match blueprint.language {
        Language::Rust => "//!",
        Language::Python => "#",
    };
    format!("{} {}: {}\n", prefix, blueprint.name, blueprint.purpose)
}
