//! Prompt templates for unit evolution and pattern adaptation.

use crate::backend::{GenerationError, GenerationResult};
use brood_core::fragment::Fragment;
use brood_core::types::{ModelTier, Stage};
use brood_core::unit::Unit;

/// A prompt template for generation requests.
pub trait PromptTemplate {
    /// Generate the prompt text.
    fn generate(&self) -> String;

    /// Get the system prompt (if any).
    fn system_prompt(&self) -> Option<String> {
        None
    }
}

/// Prompt for one development step of a unit.
#[derive(Debug, Clone)]
pub struct EvolutionPrompt {
    pub unit: String,
    pub language: String,
    pub purpose: String,
    pub stage: Stage,
    pub criteria: Vec<(String, bool)>,
    pub tier: ModelTier,
    pub max_tokens: u32,
    pub priority: f64,
    /// Current main source, if any exists yet.
    pub current_source: Option<String>,
    /// Partner unit name and intent, when this unit translates its partner.
    pub partner_intent: Option<(String, String)>,
}

impl EvolutionPrompt {
    pub fn for_unit(unit: &Unit, tier: ModelTier, max_tokens: u32, priority: f64) -> Self {
        let criteria = unit
            .blueprint
            .success_criteria
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), unit.criteria_met.get(i).copied().unwrap_or(false)))
            .collect();
        Self {
            unit: unit.id.to_string(),
            language: unit.blueprint.language.as_str().to_string(),
            purpose: unit.blueprint.purpose.clone(),
            stage: unit.stage,
            criteria,
            tier,
            max_tokens,
            priority,
            current_source: None,
            partner_intent: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        self.current_source = if source.trim().is_empty() { None } else { Some(source) };
        self
    }

    pub fn with_partner_intent(mut self, partner: impl Into<String>, intent: impl Into<String>) -> Self {
        self.partner_intent = Some((partner.into(), intent.into()));
        self
    }
}

impl PromptTemplate for EvolutionPrompt {
    fn system_prompt(&self) -> Option<String> {
        Some(format!(
            "You are growing a {} module one stage at a time. \
             Respond with the complete updated module in a single fenced code block.",
            self.language
        ))
    }

    fn generate(&self) -> String {
        let criteria = self
            .criteria
            .iter()
            .map(|(c, met)| format!("- [{}] {}", if *met { "x" } else { " " }, c))
            .collect::<Vec<_>>()
            .join("\n");

        let source = match &self.current_source {
            Some(src) => format!("\n## Current source\n```\n{}\n```\n", src),
            None => String::new(),
        };
        let partner = match &self.partner_intent {
            Some((name, intent)) => format!(
                "\n## Translate from {}\nCarry this module's intent over into idiomatic {} \
                 with minimal dependencies:\n{}\n",
                name, self.language, intent
            ),
            None => String::new(),
        };

        format!(
            r#"# Unit: {unit}
Language: {language}
Model tier: {tier}
Token budget: {tokens}
Priority: {priority:.1}

## Purpose
{purpose}

## Stage: {stage}
Focus: {focus}

## Success criteria
{criteria}
{partner}{source}
Mark every criterion the code satisfies with a comment of the form `// ✓ <criterion>`.
Return the whole module in one fenced code block."#,
            unit = self.unit,
            language = self.language,
            tier = self.tier,
            tokens = self.max_tokens,
            priority = self.priority,
            purpose = self.purpose,
            stage = self.stage,
            focus = self.stage.focus(),
            criteria = criteria,
            partner = partner,
            source = source,
        )
    }
}

/// Prompt asking the model to rewrite a donor fragment for a recipient.
#[derive(Debug, Clone)]
pub struct AdaptPrompt {
    pub fragment_name: String,
    pub fragment_body: String,
    pub recipient: String,
    pub recipient_source: String,
}

impl AdaptPrompt {
    pub fn new(fragment: &Fragment, recipient: &str, recipient_source: &str) -> Self {
        Self {
            fragment_name: fragment.name.clone(),
            fragment_body: fragment.body.clone(),
            recipient: recipient.to_string(),
            recipient_source: recipient_source.to_string(),
        }
    }
}

impl PromptTemplate for AdaptPrompt {
    fn system_prompt(&self) -> Option<String> {
        Some(
            "You adapt a proven code fragment so it fits an existing module. \
             Keep the module's naming and conventions. Respond with only the adapted fragment \
             in a fenced code block."
                .to_string(),
        )
    }

    fn generate(&self) -> String {
        format!(
            "Adapt `{}` for module `{}`.\n\n## Fragment\n```\n{}\n```\n\n## Module\n```\n{}\n```\n",
            self.fragment_name, self.recipient, self.fragment_body, self.recipient_source
        )
    }
}

/// Pull code out of a model response.
///
/// Takes the first fenced block if there is one, otherwise the whole text.
/// An empty result is an invalid response.
pub fn extract_code(response: &str) -> GenerationResult<String> {
    let code = match response.find("```") {
        Some(start) => {
            let after = &response[start + 3..];
            // Skip the language tag line.
            let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
            let body = &after[body_start..];
            match body.find("```") {
                Some(end) => &body[..end],
                None => body,
            }
        }
        None => response,
    };

    let code = code.trim_matches('\n').trim_end();
    if code.trim().is_empty() {
        return Err(GenerationError::InvalidResponse(
            "response contained no code".to_string(),
        ));
    }
    Ok(code.to_string())
}

/// Join a system prompt and user prompt for backends without a system slot.
pub fn render<P: PromptTemplate>(prompt: &P) -> String {
    match prompt.system_prompt() {
        Some(system) => format!("{}\n\n{}", system, prompt.generate()),
        None => prompt.generate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brood_core::unit::UnitBlueprint;
    use std::path::PathBuf;

    fn unit() -> Unit {
        let bp = UnitBlueprint::new("lexer", "Tokenize input")
            .with_criterion("handles whitespace")
            .with_criterion("reports positions");
        let mut unit = Unit::new(bp, "parsers", PathBuf::from("/tmp/lexer"));
        unit.criteria_met = vec![true, false];
        unit
    }

    #[test]
    fn test_evolution_prompt_contents() {
        let prompt = EvolutionPrompt::for_unit(&unit(), ModelTier::Standard, 4096, 4.5)
            .with_source("pub fn lex() {}");
        let text = prompt.generate();
        assert!(text.contains("# Unit: lexer"));
        assert!(text.contains("Model tier: standard"));
        assert!(text.contains("Token budget: 4096"));
        assert!(text.contains("- [x] handles whitespace"));
        assert!(text.contains("- [ ] reports positions"));
        assert!(text.contains(Stage::Seed.focus()));
        assert!(text.contains("pub fn lex() {}"));
        assert!(prompt.system_prompt().unwrap().contains("Rust"));
    }

    #[test]
    fn test_partner_intent_section() {
        let plain = EvolutionPrompt::for_unit(&unit(), ModelTier::Swift, 1024, 1.0).generate();
        assert!(!plain.contains("Translate from"));

        let text = EvolutionPrompt::for_unit(&unit(), ModelTier::Swift, 1024, 1.0)
            .with_partner_intent("lexer-py", "Purpose: Tokenize input\nInterface:\ndef lex(text)")
            .generate();
        assert!(text.contains("## Translate from lexer-py"));
        assert!(text.contains("idiomatic Rust"));
        assert!(text.contains("def lex(text)"));
    }

    #[test]
    fn test_empty_source_omitted() {
        let prompt = EvolutionPrompt::for_unit(&unit(), ModelTier::Swift, 1024, 1.0).with_source("  ");
        assert!(!prompt.generate().contains("Current source"));
    }

    #[test]
    fn test_extract_fenced_block() {
        let response = "Here you go:\n```rust\npub fn a() {}\n```\nand more\n```\nignored\n```";
        assert_eq!(extract_code(response).unwrap(), "pub fn a() {}");
    }

    #[test]
    fn test_extract_plain_text() {
        assert_eq!(extract_code("fn b() {}\n").unwrap(), "fn b() {}");
    }

    #[test]
    fn test_extract_empty_is_invalid() {
        assert!(matches!(extract_code("```rust\n\n```"), Err(GenerationError::InvalidResponse(_))));
        assert!(extract_code("   ").is_err());
    }

    #[test]
    fn test_adapt_prompt() {
        let fragment = Fragment {
            name: "clamp01".into(),
            kind: brood_core::protein::ProteinKind::Function,
            body: "fn clamp01() {}".into(),
            source_path: "src/lib.rs".into(),
            line_count: 1,
            has_tests: true,
            external_deps: 0,
        };
        let text = render(&AdaptPrompt::new(&fragment, "parser", "fn parse() {}"));
        assert!(text.starts_with("You adapt"));
        assert!(text.contains("Adapt `clamp01` for module `parser`"));
    }
}
