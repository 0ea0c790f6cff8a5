//! The population registry: every live unit and the groups they belong to.
//!
//! Each unit sits in its own [`UnitCell`] behind its own lock, so mutating
//! one unit never blocks work on another. The registry maps themselves are
//! only locked briefly to look up or insert cells.

use crate::allocator::can_call;
use crate::error::PopulationError;
use brood_core::group::{sibling_similarity, Group};
use brood_core::types::{Stage, StorageState, UnitId};
use brood_core::unit::Unit;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// A unit plus its throttle bookkeeping.
pub struct UnitCell {
    pub id: UnitId,
    pub unit: Mutex<Unit>,
    last_call: std::sync::Mutex<Option<Instant>>,
}

impl UnitCell {
    pub fn new(unit: Unit) -> Self {
        Self {
            id: unit.id.clone(),
            unit: Mutex::new(unit),
            last_call: std::sync::Mutex::new(None),
        }
    }

    /// Check the throttle and record the call in one step.
    ///
    /// Two workers racing on the same unit cannot both pass.
    pub fn try_acquire(&self, interval: Duration, now: Instant) -> bool {
        let mut last = self.last_call.lock().unwrap_or_else(|p| p.into_inner());
        if can_call(*last, interval, now) {
            *last = Some(now);
            true
        } else {
            false
        }
    }

    pub fn last_call(&self) -> Option<Instant> {
        *self.last_call.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// One row of the population listing.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub id: UnitId,
    pub group: String,
    pub stage: Stage,
    pub fitness: f64,
    pub temperature: Option<f64>,
    pub storage_state: StorageState,
    pub stalled_count: u32,
    pub cycles: u64,
    pub contributions: u32,
    pub degraded: bool,
}

impl UnitSummary {
    pub fn of(unit: &Unit) -> Self {
        Self {
            id: unit.id.clone(),
            group: unit.group.clone(),
            stage: unit.stage,
            fitness: unit.fitness,
            temperature: unit.temperature,
            storage_state: unit.storage_state(),
            stalled_count: unit.stalled_count,
            cycles: unit.cycles,
            contributions: unit.contributions,
            degraded: unit.degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub members: usize,
    /// `1 - mean pairwise |ΔT| / 100` over measured members.
    pub similarity: f64,
    /// Summed allocation priority of the members. Filled in by the orchestrator.
    pub budget: f64,
}

#[derive(Default)]
pub struct Population {
    units: RwLock<BTreeMap<UnitId, Arc<UnitCell>>>,
    groups: RwLock<BTreeMap<String, Group>>,
    cycle: AtomicU64,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub fn set_cycle(&self, cycle: u64) {
        self.cycle.store(cycle, Ordering::SeqCst);
    }

    /// Advance the cycle counter and return the new value.
    pub fn next_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn create_group(&self, name: &str) -> Result<(), PopulationError> {
        let mut groups = self.groups.write().await;
        if groups.contains_key(name) {
            return Err(PopulationError::GroupExists(name.to_string()));
        }
        groups.insert(name.to_string(), Group::new(name));
        Ok(())
    }

    /// Restore a group as persisted.
    pub async fn insert_group(&self, group: Group) {
        self.groups.write().await.insert(group.name.clone(), group);
    }

    /// Remove an empty group.
    pub async fn remove_group(&self, name: &str) -> Result<Group, PopulationError> {
        let mut groups = self.groups.write().await;
        let members = groups
            .get(name)
            .map(|g| g.len())
            .ok_or_else(|| PopulationError::UnknownGroup(name.to_string()))?;
        if members > 0 {
            return Err(PopulationError::GroupNotEmpty {
                group: name.to_string(),
                members,
            });
        }
        groups
            .remove(name)
            .ok_or_else(|| PopulationError::UnknownGroup(name.to_string()))
    }

    pub async fn group(&self, name: &str) -> Option<Group> {
        self.groups.read().await.get(name).cloned()
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.groups.read().await.values().cloned().collect()
    }

    pub async fn group_names(&self) -> Vec<String> {
        self.groups.read().await.keys().cloned().collect()
    }

    /// Add a unit to the registry and to its group.
    pub async fn insert(&self, unit: Unit) -> Result<Arc<UnitCell>, PopulationError> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(&unit.group)
            .ok_or_else(|| PopulationError::UnknownGroup(unit.group.clone()))?;

        let mut units = self.units.write().await;
        if units.contains_key(&unit.id) {
            return Err(PopulationError::DuplicateUnit(unit.id.clone()));
        }
        group.add(unit.id.clone());
        let cell = Arc::new(UnitCell::new(unit));
        units.insert(cell.id.clone(), Arc::clone(&cell));
        Ok(cell)
    }

    /// Remove a unit from the registry and its group.
    pub async fn remove(&self, id: &UnitId) -> Option<Arc<UnitCell>> {
        let cell = self.units.write().await.remove(id)?;
        let mut groups = self.groups.write().await;
        for group in groups.values_mut() {
            group.remove(id);
        }
        Some(cell)
    }

    pub async fn get(&self, id: &UnitId) -> Option<Arc<UnitCell>> {
        self.units.read().await.get(id).cloned()
    }

    /// All cells in id order.
    pub async fn cells(&self) -> Vec<Arc<UnitCell>> {
        self.units.read().await.values().cloned().collect()
    }

    /// Cells of one group in id order.
    pub async fn members(&self, group: &str) -> Vec<Arc<UnitCell>> {
        let ids: Vec<UnitId> = match self.groups.read().await.get(group) {
            Some(g) => g.members().cloned().collect(),
            None => return Vec::new(),
        };
        let units = self.units.read().await;
        ids.iter().filter_map(|id| units.get(id).cloned()).collect()
    }

    pub async fn len(&self) -> usize {
        self.units.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.units.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<UnitSummary> {
        let mut rows = Vec::new();
        for cell in self.cells().await {
            rows.push(UnitSummary::of(&*cell.unit.lock().await));
        }
        rows
    }

    pub async fn group_summaries(&self) -> Vec<GroupSummary> {
        let mut out = Vec::new();
        for name in self.group_names().await {
            let members = self.members(&name).await;
            let mut temps = Vec::new();
            for cell in &members {
                if let Some(t) = cell.unit.lock().await.temperature {
                    temps.push(t);
                }
            }
            out.push(GroupSummary {
                name,
                members: members.len(),
                similarity: sibling_similarity(&temps),
                budget: 0.0,
            });
        }
        out
    }

    /// Owned copies of every unit, for persistence.
    pub async fn snapshot(&self) -> Vec<Unit> {
        let mut units = Vec::new();
        for cell in self.cells().await {
            units.push(cell.unit.lock().await.clone());
        }
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brood_core::unit::UnitBlueprint;
    use std::path::PathBuf;

    fn unit(name: &str, group: &str) -> Unit {
        let bp = UnitBlueprint::new(name, "p").with_criterion("c");
        Unit::new(bp, group, PathBuf::from(format!("/tmp/{name}")))
    }

    #[tokio::test]
    async fn units_join_their_group() {
        let pop = Population::new();
        pop.create_group("g").await.unwrap();
        pop.insert(unit("b", "g")).await.unwrap();
        pop.insert(unit("a", "g")).await.unwrap();

        let ids: Vec<_> = pop.members("g").await.iter().map(|c| c.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(pop.len().await, 2);
    }

    #[tokio::test]
    async fn insert_checks_group_and_duplicates() {
        let pop = Population::new();
        assert!(matches!(
            pop.insert(unit("a", "missing")).await,
            Err(PopulationError::UnknownGroup(_))
        ));
        pop.create_group("g").await.unwrap();
        pop.insert(unit("a", "g")).await.unwrap();
        assert!(matches!(
            pop.insert(unit("a", "g")).await,
            Err(PopulationError::DuplicateUnit(_))
        ));
        assert!(matches!(pop.create_group("g").await, Err(PopulationError::GroupExists(_))));
    }

    #[tokio::test]
    async fn removal_leaves_group() {
        let pop = Population::new();
        pop.create_group("g").await.unwrap();
        pop.insert(unit("a", "g")).await.unwrap();

        assert!(matches!(
            pop.remove_group("g").await,
            Err(PopulationError::GroupNotEmpty { members: 1, .. })
        ));
        assert!(pop.remove(&UnitId::new("a")).await.is_some());
        assert!(pop.group("g").await.unwrap().is_empty());
        pop.remove_group("g").await.unwrap();
        assert!(pop.groups().await.is_empty());
    }

    #[tokio::test]
    async fn throttle_gate_is_check_and_record() {
        let cell = UnitCell::new(unit("a", "g"));
        let t0 = Instant::now();
        let interval = Duration::from_secs(10);
        assert!(cell.try_acquire(interval, t0));
        assert!(!cell.try_acquire(interval, t0 + Duration::from_secs(3)));
        assert!(cell.try_acquire(interval, t0 + Duration::from_secs(11)));
        assert_eq!(cell.last_call(), Some(t0 + Duration::from_secs(11)));
    }

    #[tokio::test]
    async fn concurrent_acquire_admits_one() {
        let cell = Arc::new(UnitCell::new(unit("a", "g")));
        let now = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cell = Arc::clone(&cell);
            handles.push(tokio::spawn(async move {
                cell.try_acquire(Duration::from_secs(60), now)
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn group_similarity_uses_measured_members() {
        let pop = Population::new();
        pop.create_group("g").await.unwrap();
        let a = pop.insert(unit("a", "g")).await.unwrap();
        let b = pop.insert(unit("b", "g")).await.unwrap();
        pop.insert(unit("c", "g")).await.unwrap();
        a.unit.lock().await.temperature = Some(80.0);
        b.unit.lock().await.temperature = Some(20.0);

        let summary = &pop.group_summaries().await[0];
        assert_eq!(summary.members, 3);
        assert!((summary.similarity - 0.4).abs() < 1e-9);
    }
}
