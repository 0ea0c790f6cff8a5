//! Population persistence: save and load the whole brood as JSON.
//!
//! A state file holds every unit (with its history and storage state),
//! the groups, the protein pool and the cycle counter.

use crate::pool::ProteinPool;
use crate::population::Population;
use brood_core::group::Group;
use brood_core::protein::Protein;
use brood_core::unit::Unit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Snapshot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub session_id: String,
    pub cycle: u64,
    pub unit_count: usize,
    pub protein_count: usize,
    pub saved_at: DateTime<Utc>,
}

/// Serializable snapshot of a population and its protein pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationState {
    pub metadata: StateMetadata,
    pub groups: Vec<Group>,
    pub units: Vec<Unit>,
    #[serde(default)]
    pub proteins: Vec<Protein>,
}

impl PopulationState {
    /// Capture the current population and pool.
    pub async fn capture(population: &Population, pool: &ProteinPool) -> Self {
        let units = population.snapshot().await;
        let proteins: Vec<Protein> = pool.iter().cloned().collect();
        Self {
            metadata: StateMetadata {
                session_id: uuid::Uuid::new_v4().to_string(),
                cycle: population.cycle(),
                unit_count: units.len(),
                protein_count: proteins.len(),
                saved_at: Utc::now(),
            },
            groups: population.groups().await,
            units,
            proteins,
        }
    }

    /// Rebuild a population and pool from this snapshot.
    ///
    /// Units whose group is missing from the snapshot get the group created.
    pub async fn restore(self) -> (Population, ProteinPool) {
        let population = Population::new();
        population.set_cycle(self.metadata.cycle);
        // Membership is rebuilt from the units themselves.
        for group in self.groups {
            let mut empty = Group::new(group.name.clone());
            empty.created_at = group.created_at;
            population.insert_group(empty).await;
        }
        for unit in self.units {
            if !unit.id.is_path_safe() {
                tracing::warn!("Skipping unit with unsafe name {:?} while restoring state", unit.id.as_str());
                continue;
            }
            if population.group(&unit.group).await.is_none() {
                population.insert_group(Group::new(unit.group.clone())).await;
            }
            if let Err(e) = population.insert(unit).await {
                tracing::warn!("Skipping unit while restoring state: {}", e);
            }
        }

        let mut pool = ProteinPool::new();
        for protein in self.proteins {
            pool.add(protein);
        }
        (population, pool)
    }

    /// Write the snapshot, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!(
            "Saved {} unit(s) and {} protein(s) to {}",
            self.metadata.unit_count,
            self.metadata.protein_count,
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brood_core::protein::ProteinKind;
    use brood_core::types::{Stage, UnitId};
    use brood_core::unit::UnitBlueprint;

    #[tokio::test]
    async fn save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let population = Population::new();
        population.create_group("parsers").await.unwrap();
        population.create_group("empty").await.unwrap();

        let bp = UnitBlueprint::new("lexer", "Tokenize").with_criterion("c").needs("hashing");
        let mut unit = Unit::new(bp, "parsers", dir.path().join("lexer"));
        unit.stage = Stage::MidForm;
        unit.fitness = 0.4;
        unit.temperature = Some(42.0);
        population.insert(unit).await.unwrap();
        population.set_cycle(7);

        let mut pool = ProteinPool::new();
        pool.add(Protein::authored("hash", ProteinKind::Function, "fn hash() {}", ["hashing".to_string()]));

        let path = dir.path().join("state/brood.json");
        PopulationState::capture(&population, &pool).await.save(&path).unwrap();

        let state = PopulationState::load(&path).unwrap();
        assert_eq!(state.metadata.unit_count, 1);
        assert_eq!(state.metadata.cycle, 7);

        let (restored, pool) = state.restore().await;
        assert_eq!(restored.cycle(), 7);
        assert_eq!(restored.group_names().await, vec!["empty", "parsers"]);
        let cell = restored.get(&UnitId::new("lexer")).await.unwrap();
        let unit = cell.unit.lock().await;
        assert_eq!(unit.stage, Stage::MidForm);
        assert_eq!(unit.temperature, Some(42.0));
        assert_eq!(unit.local_path(), Some(dir.path().join("lexer").as_path()));
        assert!(unit.blueprint.dependency_names.contains("hashing"));
        assert!(pool.get("hash").is_some());
    }

    #[tokio::test]
    async fn hand_edited_escaping_names_are_dropped_on_restore() {
        let dir = tempfile::tempdir().unwrap();
        let population = Population::new();
        population.create_group("g").await.unwrap();
        for name in ["lexer", "../victim"] {
            let bp = UnitBlueprint::new(name, "p").with_criterion("c");
            population.insert(Unit::new(bp, "g", dir.path().join("work"))).await.unwrap();
        }

        let state = PopulationState::capture(&population, &ProteinPool::new()).await;
        let (restored, _) = state.restore().await;
        assert_eq!(restored.len().await, 1);
        assert!(restored.get(&UnitId::new("lexer")).await.is_some());
    }

    #[test]
    fn garbage_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(PopulationState::load(&path), Err(PersistError::Json(_))));
    }
}
