//! Proteins: immutable, reusable code fragments.
//!
//! A protein is either authored by hand or salvaged from a failing unit.
//! Once created it never changes; the pool may only drop it.
//!
//! Authored proteins are stored as plain source files with a header of
//! `// @key: value` comments:
//!
//! ```text
//! // @name: retry_with_backoff
//! // @type: function
//! // @provides: retry, resilience
//!
//! fn retry_with_backoff() { /* ... */ }
//! ```

use crate::fragment::Fragment;
use crate::types::UnitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Shape of the fragment a protein carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProteinKind {
    Function,
    Pattern,
    Module,
}

impl ProteinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProteinKind::Function => "function",
            ProteinKind::Pattern => "pattern",
            ProteinKind::Module => "module",
        }
    }

    fn parse(s: &str) -> ProteinKind {
        match s.trim().to_lowercase().as_str() {
            "pattern" | "trait" | "impl" => ProteinKind::Pattern,
            "module" | "struct" => ProteinKind::Module,
            _ => ProteinKind::Function,
        }
    }
}

/// Provenance of a protein.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "unit", rename_all = "snake_case")]
pub enum Origin {
    Authored,
    SalvagedFrom(UnitId),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Authored => f.write_str("authored"),
            Origin::SalvagedFrom(unit) => write!(f, "salvaged-from:{}", unit),
        }
    }
}

/// A reusable code fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protein {
    pub name: String,
    pub kind: ProteinKind,
    pub payload: String,
    pub provides: BTreeSet<String>,
    pub origin: Origin,
    /// Derived score in [0, 1] used for filtering.
    pub quality_signal: f64,
    pub created_at: DateTime<Utc>,
}

impl Protein {
    /// Create an authored protein.
    pub fn authored(
        name: impl Into<String>,
        kind: ProteinKind,
        payload: impl Into<String>,
        provides: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            payload: payload.into(),
            provides: provides.into_iter().collect(),
            origin: Origin::Authored,
            quality_signal: 1.0,
            created_at: Utc::now(),
        }
    }

    /// Create a protein salvaged from a failing unit.
    ///
    /// The protein provides the fragment's own name plus every capability
    /// the unit declared.
    pub fn salvaged(
        unit: &UnitId,
        fragment: &Fragment,
        unit_capabilities: &BTreeSet<String>,
        quality_signal: f64,
    ) -> Self {
        let mut provides = unit_capabilities.clone();
        provides.insert(fragment.name.clone());
        Self {
            name: format!("{}::{}", unit, fragment.name),
            kind: fragment.kind,
            payload: fragment.body.clone(),
            provides,
            origin: Origin::SalvagedFrom(unit.clone()),
            quality_signal: quality_signal.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }

    pub fn is_salvaged_from(&self, unit: &UnitId) -> bool {
        matches!(&self.origin, Origin::SalvagedFrom(u) if u == unit)
    }

    /// Whether any provided capability is in `needs`.
    pub fn satisfies_any(&self, needs: &BTreeSet<String>) -> bool {
        !self.provides.is_disjoint(needs)
    }

    /// Append the payload to a module's source.
    pub fn inject_into(&self, module: &str) -> String {
        if module.trim().is_empty() {
            return format!("{}\n", self.payload.trim_end());
        }
        format!(
            "{}\n\n// protein: {} ({})\n{}\n",
            module.trim_end(),
            self.name,
            self.origin,
            self.payload.trim_end()
        )
    }

    /// Parse an authored protein file.
    ///
    /// Missing headers fall back to `name = "unnamed"`, `type = function`,
    /// and no provided capabilities.
    pub fn parse(text: &str) -> Self {
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut code_lines = Vec::new();
        let mut in_header = true;

        for line in text.lines() {
            let trimmed = line.trim();
            if in_header {
                if let Some(rest) = trimmed.strip_prefix("// @") {
                    if let Some((key, value)) = rest.split_once(':') {
                        headers.push((key.trim().to_lowercase(), value.trim().to_string()));
                    }
                    continue;
                }
                if trimmed.is_empty() && code_lines.is_empty() {
                    continue;
                }
                in_header = false;
            }
            code_lines.push(line);
        }

        let header = |key: &str| {
            headers
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let provides = header("provides")
            .map(|p| {
                p.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: header("name").unwrap_or_else(|| "unnamed".to_string()),
            kind: header("type").map(|t| ProteinKind::parse(&t)).unwrap_or(ProteinKind::Function),
            payload: code_lines.join("\n"),
            provides,
            origin: Origin::Authored,
            quality_signal: 1.0,
            created_at: Utc::now(),
        }
    }

    /// Render in the authored file format.
    pub fn render(&self) -> String {
        let provides: Vec<&str> = self.provides.iter().map(|s| s.as_str()).collect();
        format!(
            "// @name: {}\n// @type: {}\n// @provides: {}\n\n{}\n",
            self.name,
            self.kind.as_str(),
            provides.join(", "),
            self.payload.trim_end()
        )
    }
}
