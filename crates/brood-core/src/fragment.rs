//! Fragment extraction: locating self-contained definitions in unit content.
//!
//! Both diffusion and salvage need to pull reusable pieces out of a unit.
//! The mechanism sits behind [`FragmentExtractor`] so a model-assisted
//! strategy can replace the rule-based one; the hard contract is the
//! [`QualityBar`] filter applied afterwards.

use crate::content::ContentTree;
use crate::error::SalvageError;
use crate::protein::ProteinKind;
use crate::types::UnitId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A self-contained definition lifted out of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub name: String,
    pub kind: ProteinKind,
    pub body: String,
    pub source_path: String,
    pub line_count: usize,
    /// Assertions inside the body or a test that calls it.
    pub has_tests: bool,
    /// Distinct non-std crates/modules the body reaches into.
    pub external_deps: usize,
}

/// Pluggable extraction strategy.
pub trait FragmentExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Extract every candidate fragment from a unit's content.
    ///
    /// Candidates are not yet filtered; callers apply a [`QualityBar`].
    fn extract(&self, unit: &UnitId, content: &ContentTree) -> Result<Vec<Fragment>, SalvageError>;
}

/// Minimum value a fragment must show before it is transferred or kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBar {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_max_external_deps")]
    pub max_external_deps: usize,
    #[serde(default = "default_require_tests")]
    pub require_tests: bool,
}

fn default_max_lines() -> usize { 80 }
fn default_max_external_deps() -> usize { 2 }
fn default_require_tests() -> bool { true }

impl Default for QualityBar {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            max_external_deps: default_max_external_deps(),
            require_tests: default_require_tests(),
        }
    }
}

impl QualityBar {
    pub fn admits(&self, fragment: &Fragment) -> bool {
        (!self.require_tests || fragment.has_tests)
            && fragment.line_count <= self.max_lines
            && fragment.external_deps <= self.max_external_deps
    }

    /// Score in [0, 1]: tests 0.5, compactness 0.3, independence 0.2.
    pub fn score(&self, fragment: &Fragment) -> f64 {
        let tests = if fragment.has_tests { 0.5 } else { 0.0 };
        let size = if self.max_lines == 0 {
            0.0
        } else {
            1.0 - (fragment.line_count as f64 / self.max_lines as f64).min(1.0)
        };
        let deps = 1.0
            - (fragment.external_deps as f64 / (self.max_external_deps as f64 + 1.0)).min(1.0);
        (tests + 0.3 * size + 0.2 * deps).clamp(0.0, 1.0)
    }
}

/// Line-based extractor for Rust and Python sources.
///
/// Rust: free functions (no `self` receiver) delimited by brace matching
/// over a copy of the source with literals and comments blanked out, with
/// `#[test]` functions collected separately as test evidence. A function
/// whose braces never close is skipped; the file only fails when nothing in
/// it could be delimited.
/// Python: top-level and nested `def` blocks delimited by indentation,
/// with `test_*` functions as test evidence.
#[derive(Debug, Clone, Default)]
pub struct RuleExtractor;

impl RuleExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FragmentExtractor for RuleExtractor {
    fn name(&self) -> &str {
        "rule"
    }

    fn extract(&self, unit: &UnitId, content: &ContentTree) -> Result<Vec<Fragment>, SalvageError> {
        let mut fragments = Vec::new();
        for (path, text) in content.sources() {
            let found = if path.ends_with(".rs") {
                extract_rust(path, text).map_err(|reason| SalvageError::ExtractionFailed {
                    unit: unit.clone(),
                    reason,
                })?
            } else {
                extract_python(path, text)
            };
            fragments.extend(found);
        }
        Ok(fragments)
    }
}

/// A delimited function before filtering.
#[derive(Debug, Clone)]
pub(crate) struct RawFn {
    pub name: String,
    pub body: String,
    pub is_test: bool,
    pub has_receiver: bool,
}

fn extract_rust(path: &str, source: &str) -> Result<Vec<Fragment>, String> {
    let masked = mask_rust(source);
    let lines: Vec<&str> = source.lines().collect();
    let code: Vec<&str> = masked.lines().collect();
    let mut raw = Vec::new();
    let mut unbalanced = Vec::new();
    let mut i = 0;

    while i < code.len() {
        let Some(name) = rust_fn_name(code[i].trim()) else {
            i += 1;
            continue;
        };

        let is_test = preceding_attributes(&code, i)
            .any(|attr| attr == "#[test]" || attr.starts_with("#[tokio::test"));

        // Find the end of the definition by brace depth.
        let mut depth: i64 = 0;
        let mut opened = false;
        let mut end = None;
        let mut signature = String::new();
        for (j, line) in code.iter().enumerate().skip(i) {
            if !opened {
                signature.push_str(line);
                if line.trim_end().ends_with(';') && !line.contains('{') {
                    // Declaration without a body (trait method).
                    end = Some(j);
                    break;
                }
            }
            for c in line.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if opened && depth <= 0 {
                end = Some(j);
                break;
            }
        }

        match end {
            Some(end) if opened => {
                let sig = signature.split('{').next().unwrap_or_default();
                raw.push(RawFn {
                    name,
                    body: lines.get(i..=end).map(|l| l.join("\n")).unwrap_or_default(),
                    is_test,
                    has_receiver: sig.contains("self"),
                });
            }
            Some(_) => {}
            None => unbalanced.push(format!("{} at {}:{}", name, path, i + 1)),
        }
        // Step into the body so nested helper functions are found too.
        i += 1;
    }

    if raw.is_empty() && !unbalanced.is_empty() {
        return Err(format!("unbalanced braces in fn {}", unbalanced.join(", ")));
    }
    Ok(rust_fragments(path, &raw))
}

/// Turn delimited Rust functions into fragments, using tests as evidence.
pub(crate) fn rust_fragments(path: &str, raw: &[RawFn]) -> Vec<Fragment> {
    let tests: Vec<&str> = raw.iter().filter(|f| f.is_test).map(|f| f.body.as_str()).collect();

    raw.iter()
        .filter(|f| !f.is_test && !f.has_receiver)
        .map(|f| {
            let call = format!("{}(", f.name);
            Fragment {
                name: f.name.clone(),
                kind: ProteinKind::Function,
                body: f.body.clone(),
                source_path: path.to_string(),
                line_count: f.body.lines().count(),
                has_tests: f.body.contains("assert") || tests.iter().any(|t| t.contains(&call)),
                external_deps: rust_external_roots(&f.body).len(),
            }
        })
        .collect()
}

/// Attribute lines directly above line `i`.
fn preceding_attributes<'a>(lines: &'a [&'a str], i: usize) -> impl Iterator<Item = &'a str> {
    lines[..i]
        .iter()
        .rev()
        .map(|l| l.trim())
        .take_while(|l| l.starts_with("#[") || l.is_empty())
        .filter(|l| !l.is_empty())
}

fn rust_fn_name(trimmed: &str) -> Option<String> {
    let mut rest = trimmed;
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "async ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    let rest = rest.strip_prefix("fn ")?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[derive(Clone, Copy)]
enum Lex {
    Code,
    LineComment,
    BlockComment(u32),
    Str,
    RawStr(usize),
}

/// Copy of `source` with comments and string/char literals blanked to
/// spaces. Line breaks are kept so line numbers still line up.
fn mask_rust(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = Lex::Code;
    let mut i = 0;

    let blank = |out: &mut String, c: char| out.push(if c == '\n' || c == '\r' { c } else { ' ' });
    let ident = |c: char| c.is_alphanumeric() || c == '_';

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            Lex::Code => {
                if c == '/' && next == Some('/') {
                    state = Lex::LineComment;
                    blank(&mut out, c);
                } else if c == '/' && next == Some('*') {
                    state = Lex::BlockComment(1);
                    out.push_str("  ");
                    i += 2;
                    continue;
                } else if c == '"' {
                    state = Lex::Str;
                    blank(&mut out, c);
                } else if c == 'r' && (i == 0 || !ident(chars[i - 1]) || (chars[i - 1] == 'b' && (i < 2 || !ident(chars[i - 2])))) {
                    let hashes = chars[i + 1..].iter().take_while(|&&h| h == '#').count();
                    if chars.get(i + 1 + hashes) == Some(&'"') {
                        for _ in 0..hashes + 2 {
                            out.push(' ');
                        }
                        state = Lex::RawStr(hashes);
                        i += hashes + 2;
                        continue;
                    }
                    out.push(c);
                } else if c == '\'' {
                    // Char literal, or a lifetime / label which stays code.
                    let len = if next == Some('\\') {
                        chars.get(i + 3..).and_then(|rest| rest.iter().position(|&q| q == '\'')).map(|p| p + 4)
                    } else if chars.get(i + 2) == Some(&'\'') {
                        Some(3)
                    } else {
                        None
                    };
                    match len {
                        Some(len) => {
                            for &skipped in &chars[i..(i + len).min(chars.len())] {
                                blank(&mut out, skipped);
                            }
                            i += len;
                            continue;
                        }
                        None => out.push(c),
                    }
                } else {
                    out.push(c);
                }
            }
            Lex::LineComment => {
                if c == '\n' {
                    state = Lex::Code;
                }
                blank(&mut out, c);
            }
            Lex::BlockComment(depth) => {
                if c == '*' && next == Some('/') {
                    state = if depth == 1 { Lex::Code } else { Lex::BlockComment(depth - 1) };
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if c == '/' && next == Some('*') {
                    state = Lex::BlockComment(depth + 1);
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                blank(&mut out, c);
            }
            Lex::Str => {
                if c == '\\' {
                    blank(&mut out, c);
                    if let Some(escaped) = next {
                        blank(&mut out, escaped);
                    }
                    i += 2;
                    continue;
                }
                if c == '"' {
                    state = Lex::Code;
                }
                blank(&mut out, c);
            }
            Lex::RawStr(hashes) => {
                let closes = c == '"'
                    && chars.len() > i + hashes
                    && chars[i + 1..=i + hashes].iter().all(|&h| h == '#');
                if closes {
                    for _ in 0..=hashes {
                        out.push(' ');
                    }
                    state = Lex::Code;
                    i += hashes + 1;
                    continue;
                }
                blank(&mut out, c);
            }
        }
        i += 1;
    }
    out
}

const STD_ROOTS: &[&str] = &["std", "core", "alloc", "crate", "self", "super"];

/// Distinct lowercase path roots (`foo::` not preceded by `::`) outside std.
pub(crate) fn rust_external_roots(body: &str) -> BTreeSet<String> {
    let mut roots = BTreeSet::new();
    let bytes = body.as_bytes();
    let mut pos = 0;
    while let Some(off) = body[pos..].find("::") {
        let at = pos + off;
        let mut start = at;
        while start > 0 && (bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_') {
            start -= 1;
        }
        let root = &body[start..at];
        let qualified = start >= 1 && bytes[start - 1] == b':';
        if !root.is_empty()
            && !qualified
            && root.starts_with(|c: char| c.is_ascii_lowercase())
            && !STD_ROOTS.contains(&root)
        {
            roots.insert(root.to_string());
        }
        pos = at + 2;
    }
    roots
}

fn extract_python(path: &str, source: &str) -> Vec<Fragment> {
    let lines: Vec<&str> = source.lines().collect();
    let mut defs = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix("def ").or_else(|| trimmed.strip_prefix("async def ")) else {
            continue;
        };
        let name: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
        if name.is_empty() {
            continue;
        }
        let indent = line.len() - trimmed.len();
        let mut end = i;
        for (j, next) in lines.iter().enumerate().skip(i + 1) {
            if next.trim().is_empty() {
                continue;
            }
            if next.len() - next.trim_start().len() <= indent {
                break;
            }
            end = j;
        }
        defs.push(RawFn {
            is_test: name.starts_with("test_"),
            has_receiver: rest.contains("(self") || rest.contains("(cls"),
            name,
            body: lines[i..=end].join("\n"),
        });
    }

    python_fragments(path, &defs)
}

/// Turn delimited Python defs into fragments, using `test_*` defs as evidence.
pub(crate) fn python_fragments(path: &str, defs: &[RawFn]) -> Vec<Fragment> {
    let tests: Vec<&str> = defs.iter().filter(|f| f.is_test).map(|f| f.body.as_str()).collect();

    defs.iter()
        .filter(|f| !f.is_test && !f.has_receiver)
        .map(|f| {
            let call = format!("{}(", f.name);
            let imports: BTreeSet<&str> = f
                .body
                .lines()
                .filter_map(|l| {
                    let t = l.trim();
                    t.strip_prefix("import ")
                        .or_else(|| t.strip_prefix("from "))
                        .and_then(|m| m.split(|c: char| c == '.' || c.is_whitespace()).next())
                })
                .collect();
            Fragment {
                name: f.name.clone(),
                kind: ProteinKind::Function,
                body: f.body.clone(),
                source_path: path.to_string(),
                line_count: f.body.lines().count(),
                has_tests: f.body.contains("assert ") || tests.iter().any(|t| t.contains(&call)),
                external_deps: imports.len(),
            }
        })
        .collect()
}
