//! Groups: named sets of sibling units that share heat with each other.

use crate::types::UnitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named, mutable set of unit references.
///
/// Membership only changes through explicit administrative action: unit
/// creation, removal on salvage, or promotion out of the population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    members: BTreeSet<UnitId>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Add a member. Returns false if it was already present.
    pub fn add(&mut self, unit: UnitId) -> bool {
        self.members.insert(unit)
    }

    pub fn remove(&mut self, unit: &UnitId) -> bool {
        self.members.remove(unit)
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.members.contains(unit)
    }

    /// Members in id order.
    pub fn members(&self) -> impl Iterator<Item = &UnitId> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Sibling similarity: `1 - mean pairwise |ΔT| / 100`.
///
/// Groups with fewer than two measured members are perfectly similar.
pub fn sibling_similarity(temperatures: &[f64]) -> f64 {
    if temperatures.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..temperatures.len() {
        for j in (i + 1)..temperatures.len() {
            total += (temperatures[i] - temperatures[j]).abs();
            pairs += 1;
        }
    }
    1.0 - total / (pairs as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_a_set() {
        let mut g = Group::new("parsers");
        assert!(g.add(UnitId::new("b")));
        assert!(g.add(UnitId::new("a")));
        assert!(!g.add(UnitId::new("a")));
        let names: Vec<_> = g.members().map(|u| u.as_str().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(g.remove(&UnitId::new("a")));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn similarity_of_spread_group() {
        assert_eq!(sibling_similarity(&[50.0]), 1.0);
        assert!((sibling_similarity(&[80.0, 20.0]) - 0.4).abs() < 1e-9);
        assert_eq!(sibling_similarity(&[30.0, 30.0, 30.0]), 1.0);
    }
}
