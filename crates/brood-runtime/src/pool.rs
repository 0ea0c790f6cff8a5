//! The shared protein pool.
//!
//! Proteins are immutable: the pool only ever adds or drops them.
//! Redistribution is pull-based; a unit receives a protein only when one of
//! its declared needs matches what the protein provides.

use brood_core::protein::{Origin, Protein};
use brood_core::types::UnitId;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct ProteinPool {
    proteins: BTreeMap<String, Protein>,
}

impl ProteinPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protein. Returns false if one with that name already exists.
    pub fn add(&mut self, protein: Protein) -> bool {
        if self.proteins.contains_key(&protein.name) {
            debug!("Protein {} already pooled", protein.name);
            return false;
        }
        self.proteins.insert(protein.name.clone(), protein);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Protein> {
        self.proteins.get(name)
    }

    /// Drop a protein from the active pool.
    pub fn prune(&mut self, name: &str) -> Option<Protein> {
        let removed = self.proteins.remove(name);
        if removed.is_some() {
            info!("Pruned protein {}", name);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Protein> {
        self.proteins.values()
    }

    pub fn len(&self) -> usize {
        self.proteins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proteins.is_empty()
    }

    /// Proteins a unit may pull: matching a need, not yet absorbed, and not
    /// salvaged from the unit itself.
    pub fn matching(
        &self,
        unit: &UnitId,
        needs: &BTreeSet<String>,
        absorbed: &BTreeSet<String>,
    ) -> Vec<&Protein> {
        if needs.is_empty() {
            return Vec::new();
        }
        self.proteins
            .values()
            .filter(|p| p.satisfies_any(needs))
            .filter(|p| !absorbed.contains(&p.name))
            .filter(|p| !p.is_salvaged_from(unit))
            .collect()
    }

    pub fn salvaged_from(&self, unit: &UnitId) -> Vec<&Protein> {
        self.proteins.values().filter(|p| p.is_salvaged_from(unit)).collect()
    }

    pub fn authored(&self) -> impl Iterator<Item = &Protein> {
        self.proteins.values().filter(|p| p.origin == Origin::Authored)
    }

    /// Import authored protein files (`*.rs`, `*.py`) from a directory.
    pub fn load_dir(&mut self, dir: &Path) -> std::io::Result<usize> {
        let mut added = 0;
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("rs" | "py")))
            .collect();
        paths.sort();
        for path in paths {
            let protein = Protein::parse(&std::fs::read_to_string(&path)?);
            if self.add(protein) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Write a protein in the authored file format.
    pub fn save_protein(&self, name: &str, path: &Path) -> std::io::Result<bool> {
        match self.proteins.get(name) {
            Some(p) => {
                std::fs::write(path, p.render())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brood_core::protein::ProteinKind;

    fn protein(name: &str, provides: &[&str]) -> Protein {
        Protein::authored(
            name,
            ProteinKind::Function,
            format!("fn {}() {{}}", name),
            provides.iter().map(|s| s.to_string()),
        )
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn names_are_unique() {
        let mut pool = ProteinPool::new();
        assert!(pool.add(protein("retry", &["resilience"])));
        assert!(!pool.add(protein("retry", &["other"])));
        assert_eq!(pool.len(), 1);
        assert!(pool.get("retry").unwrap().provides.contains("resilience"));
    }

    #[test]
    fn pull_matches_needs_only() {
        let mut pool = ProteinPool::new();
        pool.add(protein("retry", &["resilience"]));
        pool.add(protein("hash", &["hashing"]));
        let me = UnitId::new("cache");

        let got: Vec<_> = pool
            .matching(&me, &set(&["hashing"]), &BTreeSet::new())
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(got, vec!["hash"]);

        assert!(pool.matching(&me, &set(&["hashing"]), &set(&["hash"])).is_empty());
        assert!(pool.matching(&me, &BTreeSet::new(), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn prune_drops_from_pool() {
        let mut pool = ProteinPool::new();
        pool.add(protein("retry", &[]));
        assert!(pool.prune("retry").is_some());
        assert!(pool.prune("retry").is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn load_and_save_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("clamp.rs"),
            "// @name: clamp01\n// @type: function\n// @provides: math\n\nfn clamp01() {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let mut pool = ProteinPool::new();
        assert_eq!(pool.load_dir(dir.path()).unwrap(), 1);
        assert_eq!(pool.authored().count(), 1);

        let out = dir.path().join("out.rs");
        assert!(pool.save_protein("clamp01", &out).unwrap());
        assert!(std::fs::read_to_string(&out).unwrap().contains("// @provides: math"));
        assert!(!pool.save_protein("missing", &out).unwrap());
    }
}
