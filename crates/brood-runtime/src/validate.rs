//! External validation: turning unit content into fitness and criteria.

use async_trait::async_trait;
use brood_core::content::ContentTree;
use brood_core::unit::{Unit, Validation};

#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    /// Judge `content` as the next state of `unit`.
    async fn validate(&self, unit: &Unit, content: &ContentTree) -> Validation;
}

/// Checks success criteria against marker comments in the sources.
///
/// A criterion counts as met when a source line carries `✓ <criterion>` or
/// `criterion: <criterion>` (case-insensitive). Fitness blends the criteria
/// ratio with stage progress 60/40. The stage is complete once the ratio
/// reaches the next stage's progress value.
#[derive(Debug, Clone, Default)]
pub struct CriteriaValidator;

impl CriteriaValidator {
    pub fn new() -> Self {
        Self
    }

    fn marked(sources: &[String], criterion: &str) -> bool {
        let wanted = criterion.trim().to_lowercase();
        if wanted.is_empty() {
            return false;
        }
        sources.iter().any(|text| {
            text.lines().any(|line| {
                let line = line.to_lowercase();
                ["✓", "criterion:"].iter().any(|marker| {
                    line.match_indices(marker)
                        .any(|(i, _)| line[i + marker.len()..].trim_start().starts_with(&wanted))
                })
            })
        })
    }
}

#[async_trait]
impl Validator for CriteriaValidator {
    fn name(&self) -> &str {
        "criteria"
    }

    async fn validate(&self, unit: &Unit, content: &ContentTree) -> Validation {
        let sources: Vec<String> = content.sources().map(|(_, text)| text.to_string()).collect();
        let criteria_met: Vec<bool> = unit
            .blueprint
            .success_criteria
            .iter()
            .map(|c| Self::marked(&sources, c))
            .collect();

        let ratio = if criteria_met.is_empty() {
            0.0
        } else {
            criteria_met.iter().filter(|m| **m).count() as f64 / criteria_met.len() as f64
        };
        let fitness = (0.6 * ratio + 0.4 * unit.stage.progress()).clamp(0.0, 1.0);
        let stage_complete = match unit.stage.next() {
            Some(next) => ratio > 0.0 && ratio >= next.progress(),
            None => false,
        };

        Validation {
            criteria_met,
            fitness,
            stage_complete,
        }
    }
}
