//! Diffusion: warm units share heat and proven patterns with cold siblings.
//!
//! For every unordered pair in a group whose temperature gap exceeds the
//! threshold, a fixed fraction of the gap moves from the hotter unit to the
//! colder one. The fraction is at most one half, so a transfer narrows the
//! gap without ever reversing it. Alongside the heat, qualifying fragments
//! of the source are adapted into the sink's main source. The adaptation is
//! all-or-nothing per exchange.

use crate::config::DiffusionConfig;
use crate::population::UnitCell;
use crate::storage::StorageShell;
use async_trait::async_trait;
use brood_core::content::ContentTree;
use brood_core::fragment::{Fragment, FragmentExtractor, QualityBar};
use brood_core::types::{ModelTier, UnitId};
use brood_core::unit::{Unit, UnitEventKind};
use brood_llm::{extract_code, render, AdaptPrompt, GenerationBackend, GenerationError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("recipient already defines {0}")]
    Conflict(String),

    #[error("adaptation produced no code for {0}")]
    Empty(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Rewrites a donor fragment so it fits the recipient.
#[async_trait]
pub trait PatternAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn adapt(
        &self,
        fragment: &Fragment,
        donor: &UnitId,
        recipient: &Unit,
        recipient_source: &str,
    ) -> Result<String, AdaptError>;
}

/// Template rewrite: provenance header plus the fragment, refusing name clashes.
#[derive(Debug, Clone, Default)]
pub struct TemplateAdapter;

#[async_trait]
impl PatternAdapter for TemplateAdapter {
    fn name(&self) -> &str {
        "template"
    }

    async fn adapt(
        &self,
        fragment: &Fragment,
        donor: &UnitId,
        _recipient: &Unit,
        recipient_source: &str,
    ) -> Result<String, AdaptError> {
        if defines(recipient_source, &fragment.name) {
            return Err(AdaptError::Conflict(fragment.name.clone()));
        }
        let body = fragment.body.trim();
        if body.is_empty() {
            return Err(AdaptError::Empty(fragment.name.clone()));
        }
        Ok(format!("// adopted from {}: {}\n{}", donor, fragment.name, body))
    }
}

/// Model-assisted rewrite through the generation backend.
pub struct ModelAdapter {
    backend: Arc<dyn GenerationBackend>,
    tier: ModelTier,
    max_tokens: u32,
}

impl ModelAdapter {
    pub fn new(backend: Arc<dyn GenerationBackend>, tier: ModelTier, max_tokens: u32) -> Self {
        Self { backend, tier, max_tokens }
    }
}

#[async_trait]
impl PatternAdapter for ModelAdapter {
    fn name(&self) -> &str {
        "model"
    }

    async fn adapt(
        &self,
        fragment: &Fragment,
        donor: &UnitId,
        recipient: &Unit,
        recipient_source: &str,
    ) -> Result<String, AdaptError> {
        if defines(recipient_source, &fragment.name) {
            return Err(AdaptError::Conflict(fragment.name.clone()));
        }
        let prompt = render(&AdaptPrompt::new(fragment, recipient.id.as_str(), recipient_source));
        let response = self.backend.generate(&prompt, self.tier, self.max_tokens).await?;
        let code = extract_code(&response)?;
        Ok(format!("// adopted from {}: {}\n{}", donor, fragment.name, code))
    }
}

/// `block` appended to `module` after a blank line.
pub(crate) fn append_block(module: &str, block: &str) -> String {
    if module.trim().is_empty() {
        format!("{}\n", block)
    } else {
        format!("{}\n\n{}\n", module.trim_end(), block)
    }
}

/// Whether `source` already defines a function called `name`.
pub(crate) fn defines(source: &str, name: &str) -> bool {
    let rust = format!("fn {}(", name);
    let python = format!("def {}(", name);
    source.contains(&rust) || source.contains(&python)
}

/// One heat exchange between two siblings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatExchange {
    pub source: UnitId,
    pub sink: UnitId,
    pub amount: f64,
    pub pattern_count: usize,
}

pub struct DiffusionEngine {
    config: DiffusionConfig,
    bar: QualityBar,
    extractor: Arc<dyn FragmentExtractor>,
    adapter: Arc<dyn PatternAdapter>,
}

impl DiffusionEngine {
    pub fn new(
        config: DiffusionConfig,
        extractor: Arc<dyn FragmentExtractor>,
        adapter: Arc<dyn PatternAdapter>,
    ) -> Self {
        let bar = config.quality_bar();
        Self { config, bar, extractor, adapter }
    }

    /// Names of the extraction and adaptation strategies in use.
    pub fn strategies(&self) -> (&str, &str) {
        (self.extractor.name(), self.adapter.name())
    }

    /// Heat to move across a gap, or `None` when the gap is within threshold.
    pub fn transfer_amount(&self, hot: f64, cold: f64) -> Option<f64> {
        let gap = (hot - cold).abs();
        if gap > self.config.threshold {
            Some(gap * self.config.transfer_fraction)
        } else {
            None
        }
    }

    /// Run one diffusion pass over a group.
    ///
    /// Pairs are visited in id order and locked in id order, so concurrent
    /// passes cannot deadlock. Units without a measured temperature sit out.
    pub async fn run_cycle(&self, members: &[Arc<UnitCell>], storage: &StorageShell) -> Vec<HeatExchange> {
        let mut cells: Vec<&Arc<UnitCell>> = members.iter().collect();
        cells.sort_by(|a, b| a.id.cmp(&b.id));

        let mut exchanges = Vec::new();
        for i in 0..cells.len() {
            for j in (i + 1)..cells.len() {
                let mut a = cells[i].unit.lock().await;
                let mut b = cells[j].unit.lock().await;

                let (Some(ta), Some(tb)) = (a.temperature, b.temperature) else {
                    continue;
                };
                let Some(amount) = self.transfer_amount(ta, tb) else {
                    continue;
                };
                let (source, sink) = if ta >= tb { (&mut *a, &mut *b) } else { (&mut *b, &mut *a) };

                source.heat(-amount);
                sink.heat(amount);
                source.record(UnitEventKind::HeatShared { to: sink.id.clone(), amount });
                sink.record(UnitEventKind::HeatReceived { from: source.id.clone(), amount });

                let pattern_count = self.share_patterns(source, sink, storage).await;
                source.contributions += pattern_count as u32;

                debug!(
                    "Diffused {:.2} from {} to {} with {} pattern(s)",
                    amount, source.id, sink.id, pattern_count
                );
                exchanges.push(HeatExchange {
                    source: source.id.clone(),
                    sink: sink.id.clone(),
                    amount,
                    pattern_count,
                });
            }
        }
        if !exchanges.is_empty() {
            info!("Diffusion pass: {} exchange(s)", exchanges.len());
        }
        exchanges
    }

    /// Move qualifying fragments from `source` into `sink`. Returns how many
    /// were applied; zero when anything fails.
    async fn share_patterns(&self, source: &mut Unit, sink: &mut Unit, storage: &StorageShell) -> usize {
        let fragments = match self.candidates(source, sink, storage).await {
            Some(f) if !f.is_empty() => f,
            _ => return 0,
        };

        if let Err(e) = storage.materialize(sink).await {
            warn!("Cannot materialize {} for diffusion: {}", sink.id, e);
            return 0;
        }
        let mut tree: ContentTree = match storage.read_content(sink).await {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot read {} for diffusion: {}", sink.id, e);
                return 0;
            }
        };

        let language = sink.blueprint.language;
        let mut main = tree.main_source(language).unwrap_or_default().to_string();
        let mut adopted = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            match self.adapter.adapt(fragment, &source.id, sink, &main).await {
                Ok(adapted) => {
                    main = append_block(&main, &adapted);
                    adopted.push((fragment.name.clone(), adapted));
                }
                Err(e) => {
                    warn!(
                        "Adapting {} from {} into {} failed, rolling back: {}",
                        fragment.name, source.id, sink.id, e
                    );
                    return 0;
                }
            }
        }

        tree.set_main_source(language, main);
        if let Err(e) = storage.write_content(sink, &tree).await {
            warn!("Writing adopted patterns into {} failed: {}", sink.id, e);
            return 0;
        }
        for (name, adapted) in adopted {
            sink.record(UnitEventKind::PatternAdopted {
                name: name.clone(),
                from: source.id.clone(),
            });
            sink.adopted_patterns.insert(name, adapted);
        }
        fragments.len()
    }

    async fn candidates(&self, source: &mut Unit, sink: &Unit, storage: &StorageShell) -> Option<Vec<Fragment>> {
        let content = match storage.read_content(source).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot read {} for diffusion: {}", source.id, e);
                return None;
            }
        };
        let fragments = match self.extractor.extract(&source.id, &content) {
            Ok(f) => f,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        let adopted: Vec<String> = sink
            .history
            .iter()
            .filter_map(|ev| match &ev.kind {
                UnitEventKind::PatternAdopted { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        Some(
            fragments
                .into_iter()
                .filter(|f| self.bar.admits(f))
                .filter(|f| !adopted.contains(&f.name))
                .take(self.config.max_patterns_per_exchange)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use brood_core::fragment::RuleExtractor;
    use brood_core::unit::UnitBlueprint;
    use std::path::Path;

    const DONOR: &str = "pub fn clamp01(x: f64) -> f64 {\n    x.max(0.0).min(1.0)\n}\n\n#[test]\nfn clamps() {\n    assert_eq!(clamp01(2.0), 1.0);\n}\n";

    fn engine() -> DiffusionEngine {
        DiffusionEngine::new(
            DiffusionConfig::default(),
            Arc::new(RuleExtractor::new()),
            Arc::new(TemplateAdapter),
        )
    }

    async fn cell(shell: &StorageShell, name: &str, temp: f64, source: &str) -> Arc<UnitCell> {
        let bp = UnitBlueprint::new(name, "p").with_criterion("c");
        let mut unit = Unit::new(bp, "g", shell.unit_dir(&UnitId::new(name)));
        unit.temperature = Some(temp);
        shell
            .initialize(&mut unit, &ContentTree::new().with_file("src/lib.rs", source))
            .await
            .unwrap();
        Arc::new(UnitCell::new(unit))
    }

    fn shell(root: &Path) -> StorageShell {
        StorageShell::new(Arc::new(MemoryStore::new()), root.join("work"))
    }

    #[test]
    fn transfer_is_partial() {
        let e = engine();
        assert_eq!(e.transfer_amount(50.0, 30.0), None);
        let d = e.transfer_amount(80.0, 20.0).unwrap();
        assert!((d - 15.0).abs() < 1e-9);
        assert!(d < 60.0);
    }

    #[tokio::test]
    async fn hot_unit_warms_cold_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell(dir.path());
        let hot = cell(&shell, "hot", 80.0, DONOR).await;
        let cold = cell(&shell, "cold", 20.0, "pub fn start() {}\n").await;

        let exchanges = engine().run_cycle(&[hot.clone(), cold.clone()], &shell).await;
        assert_eq!(exchanges.len(), 1);
        let ex = &exchanges[0];
        assert_eq!(ex.source, UnitId::new("hot"));
        assert_eq!(ex.sink, UnitId::new("cold"));
        assert_eq!(ex.pattern_count, 1);

        let th = hot.unit.lock().await.temperature.unwrap();
        let tc = cold.unit.lock().await.temperature.unwrap();
        assert!((th - (80.0 - ex.amount)).abs() < 1e-9);
        assert!((tc - (20.0 + ex.amount)).abs() < 1e-9);
        assert!(th - tc > 0.0 && th - tc < 60.0);
        assert_eq!(hot.unit.lock().await.contributions, 1);

        let mut sink = cold.unit.lock().await;
        let tree = shell.read_content(&mut sink).await.unwrap();
        let main = tree.get("src/lib.rs").unwrap();
        assert!(main.starts_with("pub fn start() {}"));
        assert!(main.contains("// adopted from hot: clamp01"));
        assert!(sink.adopted_patterns["clamp01"].starts_with("// adopted from hot: clamp01"));
    }

    #[tokio::test]
    async fn unmeasured_units_sit_out() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell(dir.path());
        let hot = cell(&shell, "hot", 90.0, DONOR).await;
        let fresh = cell(&shell, "fresh", 0.0, "").await;
        fresh.unit.lock().await.temperature = None;

        assert!(engine().run_cycle(&[hot, fresh], &shell).await.is_empty());
    }

    #[tokio::test]
    async fn conflicting_pattern_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell(dir.path());
        let hot = cell(&shell, "hot", 80.0, DONOR).await;
        let before = "pub fn clamp01(v: f32) -> f32 { v }\n";
        let cold = cell(&shell, "cold", 10.0, before).await;

        let exchanges = engine().run_cycle(&[hot, cold.clone()], &shell).await;
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].pattern_count, 0);

        let mut sink = cold.unit.lock().await;
        let tree = shell.read_content(&mut sink).await.unwrap();
        assert_eq!(tree.get("src/lib.rs"), Some(before));
    }

    #[tokio::test]
    async fn pattern_is_adopted_once() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell(dir.path());
        let hot = cell(&shell, "hot", 100.0, DONOR).await;
        let cold = cell(&shell, "cold", 0.0, "pub fn start() {}\n").await;
        let members = [hot, cold];

        let first = engine().run_cycle(&members, &shell).await;
        assert_eq!(first[0].pattern_count, 1);
        let second = engine().run_cycle(&members, &shell).await;
        assert_eq!(second[0].pattern_count, 0);
    }

    #[tokio::test]
    async fn model_adapter_uses_backend() {
        let backend = Arc::new(
            brood_llm::MockBackend::new().with_response("Adapt `clamp01`", "```rust\nfn clamp01_adapted() {}\n```"),
        );
        let adapter = ModelAdapter::new(backend.clone(), ModelTier::Swift, 512);
        let fragment = Fragment {
            name: "clamp01".into(),
            kind: brood_core::protein::ProteinKind::Function,
            body: "fn clamp01() {}".into(),
            source_path: "src/lib.rs".into(),
            line_count: 1,
            has_tests: true,
            external_deps: 0,
        };
        let bp = UnitBlueprint::new("cold", "p").with_criterion("c");
        let sink = Unit::new(bp, "g", "/tmp/cold".into());

        let out = adapter.adapt(&fragment, &UnitId::new("hot"), &sink, "").await.unwrap();
        assert!(out.contains("fn clamp01_adapted() {}"));
        assert_eq!(backend.call_count(), 1);
    }
}
