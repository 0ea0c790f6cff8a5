//! Resource allocation: which model tier, how often, how many tokens, and
//! in what order units get served.
//!
//! The base allocation comes from a per-stage table that never decreases in
//! tier, token budget or priority from one stage to the next. Size and
//! contribution adjustments are layered on top.

use crate::config::{AllocatorConfig, ConfigError};
use brood_core::types::{ModelTier, Stage, UnitId};
use brood_core::unit::Unit;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What a unit gets for its next generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub tier: ModelTier,
    pub interval: Duration,
    pub max_tokens: u32,
    pub priority: f64,
}

/// A unit's place in the per-cycle schedule.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: UnitId,
    pub allocation: Allocation,
    pub stalled_count: u32,
}

/// Whether a call is allowed `interval` after `last`.
///
/// Denial is a scheduling signal, not an error.
pub fn can_call(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

#[derive(Debug, Clone)]
pub struct Allocator {
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Result<Self, ConfigError> {
        let ordered = config.stages.len() == Stage::ALL.len()
            && config.stages.iter().zip(Stage::ALL).all(|(row, s)| row.stage == s);
        if !ordered {
            return Err(ConfigError::Invalid(
                "allocator.stages must list every stage once, in order".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocation from the stage table alone.
    pub fn base(&self, stage: Stage) -> Allocation {
        let row = &self.config.stages[stage.index()];
        Allocation {
            tier: row.tier,
            interval: Duration::from_secs(row.interval_secs),
            max_tokens: row.max_tokens,
            priority: row.priority,
        }
    }

    /// Token multiplier for a unit's current size.
    pub fn size_multiplier(&self, content_size: usize) -> f64 {
        if content_size > self.config.huge_size_bytes {
            self.config.huge_multiplier
        } else if content_size > self.config.large_size_bytes {
            self.config.large_multiplier
        } else {
            1.0
        }
    }

    pub fn allocate(&self, unit: &Unit) -> Allocation {
        let mut alloc = self.base(unit.stage);

        let multiplier = self.size_multiplier(unit.content_size);
        alloc.max_tokens = (alloc.max_tokens as f64 * multiplier).round() as u32;
        if unit.content_size > self.config.huge_size_bytes && unit.fitness > self.config.upgrade_fitness {
            alloc.tier = alloc.tier.upgrade();
        }

        let bonus = (unit.contributions as f64 * self.config.bonus_per_contribution)
            .min(self.config.max_quality_bonus);
        alloc.priority = (alloc.priority + bonus).min(self.config.max_priority);
        alloc
    }

    /// Sort into service order: priority descending, then stalled count
    /// ascending, then id.
    pub fn order(entries: &mut [ScheduleEntry]) {
        entries.sort_by(|a, b| {
            b.allocation
                .priority
                .total_cmp(&a.allocation.priority)
                .then(a.stalled_count.cmp(&b.stalled_count))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    /// Build the ordered schedule for a set of units.
    pub fn schedule<'a>(&self, units: impl IntoIterator<Item = &'a Unit>) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> = units
            .into_iter()
            .map(|u| ScheduleEntry {
                id: u.id.clone(),
                allocation: self.allocate(u),
                stalled_count: u.stalled_count,
            })
            .collect();
        Self::order(&mut entries);
        entries
    }

    /// Total priority a group commands.
    pub fn group_budget<'a>(&self, units: impl IntoIterator<Item = &'a Unit>) -> f64 {
        units.into_iter().map(|u| self.allocate(u).priority).sum()
    }

    /// First unit in service order whose throttle would admit a call now.
    pub fn next_eligible(
        &self,
        schedule: &[ScheduleEntry],
        last_calls: &HashMap<UnitId, Instant>,
        now: Instant,
    ) -> Option<UnitId> {
        schedule
            .iter()
            .find(|e| can_call(last_calls.get(&e.id).copied(), e.allocation.interval, now))
            .map(|e| e.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brood_core::unit::UnitBlueprint;
    use std::path::PathBuf;

    fn allocator() -> Allocator {
        Allocator::new(AllocatorConfig::default()).unwrap()
    }

    fn unit(name: &str) -> Unit {
        let bp = UnitBlueprint::new(name, "p").with_criterion("c");
        Unit::new(bp, "g", PathBuf::from("/tmp").join(name))
    }

    #[test]
    fn base_table_is_monotonic() {
        let alloc = allocator();
        for pair in Stage::ALL.windows(2) {
            let lo = alloc.base(pair[0]);
            let hi = alloc.base(pair[1]);
            assert!(hi.priority >= lo.priority, "{} -> {}", pair[0], pair[1]);
            assert!(hi.max_tokens >= lo.max_tokens);
            assert!(hi.tier >= lo.tier);
        }
    }

    #[test]
    fn throttle_window() {
        let t0 = Instant::now();
        let interval = Duration::from_secs(10);
        assert!(can_call(None, interval, t0));
        assert!(!can_call(Some(t0), interval, t0 + Duration::from_secs(3)));
        assert!(can_call(Some(t0), interval, t0 + Duration::from_secs(11)));
        assert!(can_call(Some(t0), interval, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn size_boost_and_tier_upgrade() {
        let alloc = allocator();
        let mut u = unit("big");
        u.stage = Stage::MidForm;

        u.content_size = 2000;
        let a = alloc.allocate(&u);
        assert_eq!(a.max_tokens, (4096.0_f64 * 1.2).round() as u32);
        assert_eq!(a.tier, ModelTier::Standard);

        u.content_size = 6000;
        u.fitness = 0.5;
        assert_eq!(alloc.allocate(&u).tier, ModelTier::Standard);
        u.fitness = 0.8;
        let a = alloc.allocate(&u);
        assert_eq!(a.tier, ModelTier::Advanced);
        assert_eq!(a.max_tokens, 6144);
    }

    #[test]
    fn contribution_bonus_is_capped() {
        let alloc = allocator();
        let mut u = unit("giver");
        u.contributions = 3;
        assert!((alloc.allocate(&u).priority - 1.3).abs() < 1e-9);
        u.contributions = 500;
        assert!((alloc.allocate(&u).priority - 3.0).abs() < 1e-9);

        u.stage = Stage::Mature;
        assert_eq!(alloc.allocate(&u).priority, 10.0);
    }

    #[test]
    fn ordering_breaks_ties() {
        let alloc = allocator();
        let mut a = unit("a");
        let mut b = unit("b");
        let c = unit("c");
        let mut d = unit("d");
        d.stage = Stage::Refining;
        a.stalled_count = 5;
        b.stalled_count = 1;

        let order: Vec<String> = alloc
            .schedule([&a, &b, &c, &d])
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(order, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn next_eligible_skips_throttled() {
        let alloc = allocator();
        let mut hot = unit("hot");
        hot.stage = Stage::Mature;
        let cold = unit("cold");
        let schedule = alloc.schedule([&hot, &cold]);

        let now = Instant::now();
        let mut last = HashMap::new();
        assert_eq!(alloc.next_eligible(&schedule, &last, now), Some(UnitId::new("hot")));
        last.insert(UnitId::new("hot"), now);
        assert_eq!(alloc.next_eligible(&schedule, &last, now), Some(UnitId::new("cold")));
        last.insert(UnitId::new("cold"), now);
        assert_eq!(alloc.next_eligible(&schedule, &last, now), None);
    }

    #[test]
    fn group_budget_sums_priorities() {
        let alloc = allocator();
        let a = unit("a");
        let mut b = unit("b");
        b.stage = Stage::MidForm;
        assert!((alloc.group_budget([&a, &b]) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_short_table() {
        let mut config = AllocatorConfig::default();
        config.stages.pop();
        assert!(Allocator::new(config).is_err());
    }
}
