//! Temperature: a derived scalar in [0, 100] summarising a unit's progress.
//!
//! Three normalised inputs contribute: stage progress, fitness, and the
//! criteria-satisfaction ratio. Every weight must be positive so no single
//! input can drive the result alone.

use serde::{Deserialize, Serialize};

/// Relative weights of the three temperature inputs.
///
/// Weights are normalised by their sum, so only their ratios matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureWeights {
    #[serde(default = "default_stage_weight")]
    pub stage_weight: f64,
    #[serde(default = "default_fitness_weight")]
    pub fitness_weight: f64,
    #[serde(default = "default_criteria_weight")]
    pub criteria_weight: f64,
}

fn default_stage_weight() -> f64 { 0.4 }
fn default_fitness_weight() -> f64 { 0.4 }
fn default_criteria_weight() -> f64 { 0.2 }

impl Default for TemperatureWeights {
    fn default() -> Self {
        Self {
            stage_weight: default_stage_weight(),
            fitness_weight: default_fitness_weight(),
            criteria_weight: default_criteria_weight(),
        }
    }
}

impl TemperatureWeights {
    /// All three weights must be finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        [self.stage_weight, self.fitness_weight, self.criteria_weight]
            .iter()
            .all(|w| w.is_finite() && *w > 0.0)
    }

    /// Compute a temperature from normalised inputs.
    ///
    /// Inputs are clamped to [0, 1]; the result lies in [0, 100].
    pub fn temperature(&self, stage_progress: f64, fitness: f64, criteria_ratio: f64) -> f64 {
        let total = self.stage_weight + self.fitness_weight + self.criteria_weight;
        if total <= 0.0 {
            return 0.0;
        }
        let weighted = self.stage_weight * stage_progress.clamp(0.0, 1.0)
            + self.fitness_weight * fitness.clamp(0.0, 1.0)
            + self.criteria_weight * criteria_ratio.clamp(0.0, 1.0);
        (weighted / total * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_match_policy() {
        let w = TemperatureWeights::default();
        assert!(w.is_valid());
        // 0.4 * 0.5 + 0.4 * 0.5 + 0.2 * 1.0 = 0.6
        assert!((w.temperature(0.5, 0.5, 1.0) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn every_input_contributes() {
        let w = TemperatureWeights::default();
        let base = w.temperature(0.0, 0.0, 0.0);
        assert!(w.temperature(0.5, 0.0, 0.0) > base);
        assert!(w.temperature(0.0, 0.5, 0.0) > base);
        assert!(w.temperature(0.0, 0.0, 0.5) > base);
    }

    #[test]
    fn zero_weight_is_invalid() {
        let w = TemperatureWeights {
            criteria_weight: 0.0,
            ..TemperatureWeights::default()
        };
        assert!(!w.is_valid());
    }

    #[test]
    fn result_is_bounded() {
        let w = TemperatureWeights {
            stage_weight: 3.0,
            fitness_weight: 1.0,
            criteria_weight: 1.0,
        };
        assert!((w.temperature(2.0, 2.0, 2.0) - 100.0).abs() < 1e-9);
        assert_eq!(w.temperature(-1.0, -1.0, -1.0), 0.0);
    }
}
