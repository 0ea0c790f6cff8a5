//! Storage virtualization: moving unit bytes between the durable store and
//! a local working area.
//!
//! ```text
//! Remote --materialize--> Local --commit--> Synced --release--> Remote
//! Unsynced --commit--> Synced          Synced --write--> Local
//! ```
//!
//! `commit` and `release` touch shared durable history and are serialized
//! across the whole population by one gate. `materialize` only reads and
//! runs concurrently. Callers pass `&mut Unit`, so they already hold that
//! unit's exclusive lock.

mod git;
mod store;

pub use git::GitStore;
pub use store::{DurableStore, MemoryStore};

use crate::population::Population;
use brood_core::content::ContentTree;
use brood_core::error::StorageError;
use brood_core::types::{RefId, StorageState, UnitId};
use brood_core::unit::Unit;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Materialisation counts across a population.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    pub total: usize,
    /// Units with a local working copy (Local, Synced, Unsynced).
    pub local: usize,
    pub remote_only: usize,
    pub synced: usize,
    pub unsynced: usize,
    /// Fraction of units not materialised.
    pub efficiency: f64,
}

/// Outcome of a population-wide checkpoint.
#[derive(Debug, Default)]
pub struct CheckpointReport {
    pub committed: Vec<(UnitId, RefId)>,
    pub failed: Vec<(UnitId, StorageError)>,
}

pub struct StorageShell {
    store: Arc<dyn DurableStore>,
    work_root: PathBuf,
    gate: Mutex<()>,
}

impl StorageShell {
    pub fn new(store: Arc<dyn DurableStore>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_root: work_root.into(),
            gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Working directory a unit materialises into.
    pub fn unit_dir(&self, id: &UnitId) -> PathBuf {
        self.work_root.join(id.as_str())
    }

    /// Write the initial tree of a freshly created unit.
    pub async fn initialize(&self, unit: &mut Unit, tree: &ContentTree) -> Result<(), StorageError> {
        let path = unit
            .local_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::NoLocalContent(unit.id.clone()))?;
        replace_tree(&path, tree).await?;
        unit.content_size = tree.total_bytes();
        unit.touch_observed(Utc::now());
        Ok(())
    }

    /// Ensure a local working copy exists and return its path.
    ///
    /// A no-op for units that already have local content.
    #[instrument(skip_all, fields(unit = %unit.id))]
    pub async fn materialize(&self, unit: &mut Unit) -> Result<PathBuf, StorageError> {
        unit.touch_observed(Utc::now());
        if let Some(path) = unit.local_path() {
            return Ok(path.to_path_buf());
        }
        let reference = unit
            .remote_ref()
            .cloned()
            .ok_or_else(|| StorageError::NotFound(unit.id.clone()))?;

        let tree = self.store.get(&unit.id, &reference).await?;
        let dir = self.unit_dir(&unit.id);
        replace_tree(&dir, &tree).await?;
        unit.content_size = tree.total_bytes();
        unit.enter_local(dir.clone());
        debug!("Materialized {} from {}", unit.id, reference.short());
        Ok(dir)
    }

    /// Read a unit's content without changing its storage state.
    ///
    /// Remote units are read straight from the durable store.
    pub async fn read_content(&self, unit: &mut Unit) -> Result<ContentTree, StorageError> {
        unit.touch_observed(Utc::now());
        let tree = match (unit.local_path(), unit.remote_ref()) {
            (Some(path), _) => read_tree(path).await?,
            (None, Some(reference)) => self.store.get(&unit.id, reference).await?,
            (None, None) => return Err(StorageError::NotFound(unit.id.clone())),
        };
        unit.content_size = tree.total_bytes();
        Ok(tree)
    }

    /// Replace a unit's local content with `tree`.
    ///
    /// The swap is all-or-nothing: on failure the previous content stays.
    pub async fn write_content(&self, unit: &mut Unit, tree: &ContentTree) -> Result<(), StorageError> {
        let path = unit
            .local_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::NoLocalContent(unit.id.clone()))?;
        replace_tree(&path, tree).await?;
        unit.content_size = tree.total_bytes();
        unit.mark_dirty();
        unit.touch_observed(Utc::now());
        Ok(())
    }

    /// Checkpoint local content to the durable store.
    #[instrument(skip_all, fields(unit = %unit.id))]
    pub async fn commit(&self, unit: &mut Unit) -> Result<RefId, StorageError> {
        let path = unit
            .local_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::NoLocalContent(unit.id.clone()))?;

        let _gate = self.gate.lock().await;
        let tree = read_tree(&path).await?;
        let reference = self.store.put(&unit.id, &tree).await?;
        unit.enter_synced(reference.clone())?;
        debug!("Committed {} as {}", unit.id, reference.short());
        Ok(reference)
    }

    /// Drop the local copy of a synced unit.
    ///
    /// Refuses anything not `Synced`: local-only content is never deleted here.
    #[instrument(skip_all, fields(unit = %unit.id))]
    pub async fn release(&self, unit: &mut Unit) -> Result<(), StorageError> {
        if unit.storage_state() != StorageState::Synced {
            return Err(StorageError::UnsyncedRelease {
                unit: unit.id.clone(),
                state: unit.storage_state(),
            });
        }
        let _gate = self.gate.lock().await;
        if let Some(path) = unit.local_path() {
            remove_dir_if_exists(path).await?;
        }
        unit.enter_remote()?;
        debug!("Released {}", unit.id);
        Ok(())
    }

    /// Delete a unit's local content whatever its state.
    ///
    /// Only salvage may call this: the unit is being destroyed.
    pub async fn discard(&self, unit: &Unit) -> Result<(), StorageError> {
        let _gate = self.gate.lock().await;
        match unit.storage_state() {
            StorageState::Synced | StorageState::Remote => {
                info!("Discarding storage of {} ({})", unit.id, unit.storage_state());
            }
            state => {
                warn!(
                    "Discarding {} content of {} that was never checkpointed",
                    state, unit.id
                );
            }
        }
        if let Some(path) = unit.local_path() {
            remove_dir_if_exists(path).await?;
        }
        Ok(())
    }

    /// Release every synced unit idle for longer than `idle`.
    pub async fn auto_release_idle(
        &self,
        population: &Population,
        now: DateTime<Utc>,
        idle: chrono::Duration,
    ) -> Vec<UnitId> {
        let mut released = Vec::new();
        for cell in population.cells().await {
            let mut unit = cell.unit.lock().await;
            if unit.storage_state() != StorageState::Synced {
                continue;
            }
            if now.signed_duration_since(unit.last_observed()) <= idle {
                continue;
            }
            match self.release(&mut unit).await {
                Ok(()) => released.push(unit.id.clone()),
                Err(e) => warn!("Auto-release of {} failed: {}", unit.id, e),
            }
        }
        if !released.is_empty() {
            info!("Auto-released {} idle unit(s)", released.len());
        }
        released
    }

    /// Commit every unit holding uncheckpointed local content.
    pub async fn checkpoint(&self, population: &Population) -> CheckpointReport {
        let mut report = CheckpointReport::default();
        for cell in population.cells().await {
            let mut unit = cell.unit.lock().await;
            if !matches!(unit.storage_state(), StorageState::Local | StorageState::Unsynced) {
                continue;
            }
            match self.commit(&mut unit).await {
                Ok(reference) => report.committed.push((unit.id.clone(), reference)),
                Err(e) => {
                    warn!("Checkpoint of {} failed: {}", unit.id, e);
                    report.failed.push((unit.id.clone(), e));
                }
            }
        }
        report
    }

    pub async fn stats(&self, population: &Population) -> StorageStats {
        let mut stats = StorageStats::default();
        for cell in population.cells().await {
            let state = cell.unit.lock().await.storage_state();
            stats.total += 1;
            match state {
                StorageState::Remote => stats.remote_only += 1,
                StorageState::Local => stats.local += 1,
                StorageState::Synced => {
                    stats.local += 1;
                    stats.synced += 1;
                }
                StorageState::Unsynced => {
                    stats.local += 1;
                    stats.unsynced += 1;
                }
            }
        }
        stats.efficiency = if stats.total == 0 {
            0.0
        } else {
            stats.remote_only as f64 / stats.total as f64
        };
        stats
    }
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `tree` into a staging directory, then swap it in for `dir`.
async fn replace_tree(dir: &Path, tree: &ContentTree) -> Result<(), StorageError> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unit".to_string());
    let parent = dir.parent().map(Path::to_path_buf).unwrap_or_default();
    tokio::fs::create_dir_all(&parent).await?;

    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let staging = parent.join(format!(".{}.staging-{}", name, nonce));
    let retired = parent.join(format!(".{}.retired-{}", name, nonce));

    let written = async {
        tokio::fs::create_dir_all(&staging).await?;
        for (path, text) in tree.iter() {
            let target = staging.join(path);
            if let Some(p) = target.parent() {
                tokio::fs::create_dir_all(p).await?;
            }
            tokio::fs::write(&target, text).await?;
        }
        Ok::<(), std::io::Error>(())
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e.into());
    }

    let had_previous = tokio::fs::try_exists(dir).await.unwrap_or(false);
    if had_previous {
        tokio::fs::rename(dir, &retired).await?;
    }
    if let Err(e) = tokio::fs::rename(&staging, dir).await {
        if had_previous {
            let _ = tokio::fs::rename(&retired, dir).await;
        }
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e.into());
    }
    if had_previous {
        remove_dir_if_exists(&retired).await?;
    }
    Ok(())
}

/// Read every file under `dir` into a tree.
async fn read_tree(dir: &Path) -> Result<ContentTree, StorageError> {
    let mut tree = ContentTree::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && current == dir => {
                return Ok(tree);
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let text = tokio::fs::read_to_string(&path).await?;
            let relative = path
                .strip_prefix(dir)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| path.to_string_lossy().into_owned());
            tree.insert(relative, text);
        }
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brood_core::unit::UnitBlueprint;

    fn shell(root: &Path) -> (StorageShell, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (StorageShell::new(store.clone(), root.join("work")), store)
    }

    async fn seeded(shell: &StorageShell) -> Unit {
        let bp = UnitBlueprint::new("lexer", "Tokenize").with_criterion("c");
        let mut unit = Unit::new(bp, "g", shell.unit_dir(&UnitId::new("lexer")));
        let tree = ContentTree::new().with_file("src/lib.rs", "pub fn lex() {}\n");
        shell.initialize(&mut unit, &tree).await.unwrap();
        unit
    }

    #[tokio::test]
    async fn release_refuses_unsynced() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _) = shell(dir.path());
        let mut unit = seeded(&shell).await;

        let err = shell.release(&mut unit).await.unwrap_err();
        assert!(matches!(err, StorageError::UnsyncedRelease { state: StorageState::Unsynced, .. }));
        assert!(unit.local_path().unwrap().join("src/lib.rs").exists());
    }

    #[tokio::test]
    async fn full_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, store) = shell(dir.path());
        let mut unit = seeded(&shell).await;
        let local = unit.local_path().unwrap().to_path_buf();

        shell.commit(&mut unit).await.unwrap();
        assert_eq!(unit.storage_state(), StorageState::Synced);

        shell.release(&mut unit).await.unwrap();
        assert_eq!(unit.storage_state(), StorageState::Remote);
        assert!(!local.exists());
        assert!(unit.storage_consistent());

        let path = shell.materialize(&mut unit).await.unwrap();
        assert_eq!(unit.storage_state(), StorageState::Local);
        assert_eq!(store.fetch_count(), 1);
        let tree = shell.read_content(&mut unit).await.unwrap();
        assert_eq!(tree.get("src/lib.rs"), Some("pub fn lex() {}\n"));
        assert_eq!(path, local);
    }

    #[tokio::test]
    async fn materialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, store) = shell(dir.path());
        let mut unit = seeded(&shell).await;
        shell.commit(&mut unit).await.unwrap();
        shell.release(&mut unit).await.unwrap();

        let first = shell.materialize(&mut unit).await.unwrap();
        let second = shell.materialize(&mut unit).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn write_moves_synced_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _) = shell(dir.path());
        let mut unit = seeded(&shell).await;
        shell.commit(&mut unit).await.unwrap();

        let tree = ContentTree::new().with_file("src/lib.rs", "pub fn lex2() {}\n");
        shell.write_content(&mut unit, &tree).await.unwrap();
        assert_eq!(unit.storage_state(), StorageState::Local);
        assert!(unit.remote_ref().is_none());
        assert_eq!(shell.read_content(&mut unit).await.unwrap(), tree);
        assert!(shell.release(&mut unit).await.is_err());
    }

    #[tokio::test]
    async fn write_replaces_whole_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _) = shell(dir.path());
        let mut unit = seeded(&shell).await;

        let tree = ContentTree::new().with_file("src/other.rs", "fn x() {}");
        shell.write_content(&mut unit, &tree).await.unwrap();
        let back = shell.read_content(&mut unit).await.unwrap();
        assert_eq!(back, tree);
        assert!(back.get("src/lib.rs").is_none());
    }

    #[tokio::test]
    async fn failed_commit_keeps_local_state() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, store) = shell(dir.path());
        let mut unit = seeded(&shell).await;
        store.fail_next_puts(1);

        assert!(matches!(shell.commit(&mut unit).await, Err(StorageError::Backend(_))));
        assert_eq!(unit.storage_state(), StorageState::Unsynced);
        assert!(unit.local_path().is_some());
    }

    #[tokio::test]
    async fn auto_release_only_touches_idle_synced_units() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _) = shell(dir.path());
        let pop = Population::new();
        pop.create_group("g").await.unwrap();

        let mut synced = seeded(&shell).await;
        shell.commit(&mut synced).await.unwrap();
        pop.insert(synced).await.unwrap();

        let bp = UnitBlueprint::new("parser", "Parse").with_criterion("c");
        let mut local = Unit::new(bp, "g", shell.unit_dir(&UnitId::new("parser")));
        shell.initialize(&mut local, &ContentTree::new()).await.unwrap();
        pop.insert(local).await.unwrap();

        let idle = chrono::Duration::hours(24);
        let soon = Utc::now() + chrono::Duration::hours(1);
        assert!(shell.auto_release_idle(&pop, soon, idle).await.is_empty());

        let later = Utc::now() + chrono::Duration::hours(25);
        let released = shell.auto_release_idle(&pop, later, idle).await;
        assert_eq!(released, vec![UnitId::new("lexer")]);

        let stats = shell.stats(&pop).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.remote_only, 1);
        assert_eq!(stats.unsynced, 1);
        assert!((stats.efficiency - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn checkpoint_commits_local_units() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _) = shell(dir.path());
        let pop = Population::new();
        pop.create_group("g").await.unwrap();
        pop.insert(seeded(&shell).await).await.unwrap();

        let report = shell.checkpoint(&pop).await;
        assert_eq!(report.committed.len(), 1);
        assert!(report.failed.is_empty());
        assert_eq!(shell.stats(&pop).await.synced, 1);
    }

    #[tokio::test]
    async fn discard_removes_unsynced_content() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _) = shell(dir.path());
        let unit = seeded(&shell).await;
        let path = unit.local_path().unwrap().to_path_buf();
        shell.discard(&unit).await.unwrap();
        assert!(!path.exists());
    }
}
