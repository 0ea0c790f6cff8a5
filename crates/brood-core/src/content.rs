//! A unit's full content tree: relative path → file text.

use crate::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of every file belonging to a unit.
///
/// Paths are relative to the unit root and always use `/` separators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTree {
    files: BTreeMap<String, String>,
}

impl ContentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_file(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, text: impl Into<String>) {
        let path = path.into().replace('\\', "/");
        self.files.insert(path, text.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|s| s.as_str())
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, t)| (p.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total size of all files in bytes.
    pub fn total_bytes(&self) -> usize {
        self.files.values().map(|t| t.len()).sum()
    }

    /// The unit's main source file for its language, if present.
    pub fn main_source(&self, language: Language) -> Option<&str> {
        self.get(language.main_file())
    }

    pub fn set_main_source(&mut self, language: Language, text: impl Into<String>) {
        self.insert(language.main_file(), text);
    }

    /// All source files (anything that is not a metadata/JSON file).
    pub fn sources(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter(|(path, _)| path.ends_with(".rs") || path.ends_with(".py"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_size_and_main_source() {
        let mut tree = ContentTree::new()
            .with_file("src/lib.rs", "fn a() {}")
            .with_file("README.md", "hi");
        assert_eq!(tree.total_bytes(), 11);
        assert_eq!(tree.main_source(Language::Rust), Some("fn a() {}"));
        assert_eq!(tree.main_source(Language::Python), None);

        tree.set_main_source(Language::Rust, "fn b() {}");
        assert_eq!(tree.get("src/lib.rs"), Some("fn b() {}"));
        assert_eq!(tree.sources().count(), 1);
    }

    #[test]
    fn normalises_separators() {
        let tree = ContentTree::new().with_file("src\\mod.rs", "");
        assert!(tree.get("src/mod.rs").is_some());
    }
}
