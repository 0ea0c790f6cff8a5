//! Syntax-tree fragment extraction using tree-sitter.
//!
//! Produces the same [`Fragment`]s as [`RuleExtractor`](crate::fragment::RuleExtractor)
//! but delimits definitions from a real parse, so literals, comments and
//! macros cannot throw the boundaries off.
//!
//! Feature-gated behind `ast` in brood-core.

use crate::content::ContentTree;
use crate::error::SalvageError;
use crate::fragment::{python_fragments, rust_fragments, Fragment, FragmentExtractor, RawFn};
use crate::types::UnitId;
use tree_sitter::{Language, Node, Parser};

/// Source languages the syntax-tree extractor understands.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SourceLanguage {
    Rust,
    Python,
}

impl SourceLanguage {
    fn from_path(path: &str) -> Option<Self> {
        match path.rsplit('.').next()? {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            _ => None,
        }
    }

    fn tree_sitter_language(&self) -> Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    fn function_kind(&self) -> &'static str {
        match self {
            Self::Rust => "function_item",
            Self::Python => "function_definition",
        }
    }
}

/// Extractor backed by tree-sitter grammars for Rust and Python.
#[derive(Debug, Clone, Default)]
pub struct AstExtractor;

impl AstExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FragmentExtractor for AstExtractor {
    fn name(&self) -> &str {
        "ast"
    }

    fn extract(&self, unit: &UnitId, content: &ContentTree) -> Result<Vec<Fragment>, SalvageError> {
        let failed = |reason: String| SalvageError::ExtractionFailed {
            unit: unit.clone(),
            reason,
        };

        let mut fragments = Vec::new();
        for (path, text) in content.sources() {
            let Some(language) = SourceLanguage::from_path(path) else {
                continue;
            };

            let mut parser = Parser::new();
            parser
                .set_language(&language.tree_sitter_language())
                .map_err(|e| failed(format!("grammar for {}: {}", path, e)))?;
            let tree = parser
                .parse(text, None)
                .ok_or_else(|| failed(format!("parser gave no tree for {}", path)))?;

            let mut nodes = Vec::new();
            collect(tree.root_node(), language.function_kind(), &mut nodes);

            let source = text.as_bytes();
            let raw: Vec<RawFn> = nodes
                .into_iter()
                // Recovered error nodes have unreliable extents.
                .filter(|node| !node.has_error())
                .filter_map(|node| match language {
                    SourceLanguage::Rust => rust_fn(node, source),
                    SourceLanguage::Python => python_fn(node, source),
                })
                .collect();

            fragments.extend(match language {
                SourceLanguage::Rust => rust_fragments(path, &raw),
                SourceLanguage::Python => python_fragments(path, &raw),
            });
        }
        Ok(fragments)
    }
}

/// Every node of `kind` under `node`, in source order.
fn collect<'t>(node: Node<'t>, kind: &str, out: &mut Vec<Node<'t>>) {
    if node.kind() == kind {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, kind, out);
    }
}

fn text<'s>(node: Node<'_>, source: &'s [u8]) -> Option<&'s str> {
    node.utf8_text(source).ok()
}

fn rust_fn(node: Node<'_>, source: &[u8]) -> Option<RawFn> {
    // Trait method declarations have no body.
    node.child_by_field_name("body")?;
    let name = text(node.child_by_field_name("name")?, source)?.to_string();

    let has_receiver = node
        .child_by_field_name("parameters")
        .map(|params| {
            let mut cursor = params.walk();
            let found = params
                .named_children(&mut cursor)
                .any(|p| p.kind() == "self_parameter");
            found
        })
        .unwrap_or(false);

    let mut is_test = false;
    let mut prev = node.prev_sibling();
    while let Some(sibling) = prev {
        match sibling.kind() {
            "attribute_item" => {
                let attr = text(sibling, source).unwrap_or_default();
                if attr == "#[test]" || attr.starts_with("#[tokio::test") {
                    is_test = true;
                }
            }
            "line_comment" | "block_comment" => {}
            _ => break,
        }
        prev = sibling.prev_sibling();
    }

    Some(RawFn {
        name,
        body: text(node, source)?.to_string(),
        is_test,
        has_receiver,
    })
}

fn python_fn(node: Node<'_>, source: &[u8]) -> Option<RawFn> {
    let name = text(node.child_by_field_name("name")?, source)?.to_string();

    let has_receiver = node
        .child_by_field_name("parameters")
        .and_then(|params| params.named_child(0))
        .and_then(|first| text(first, source))
        .map(|first| first == "self" || first == "cls")
        .unwrap_or(false);

    Some(RawFn {
        is_test: name.starts_with("test_"),
        name,
        body: text(node, source)?.to_string(),
        has_receiver,
    })
}
