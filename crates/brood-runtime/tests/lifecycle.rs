//! End-to-end lifecycle tests: generation, diffusion, salvage, storage and
//! persistence through the orchestrator.

use brood_llm::MockBackend;
use brood_runtime::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TESTED_MODULE: &str = "```rust\npub fn clamp01(x: f64) -> f64 {\n    x.max(0.0).min(1.0)\n}\n\n#[test]\nfn clamps() {\n    assert_eq!(clamp01(2.0), 1.0);\n}\n```";

fn config(dir: &Path) -> BroodConfig {
    let mut config = BroodConfig::default();
    config.storage.work_root = dir.join("work");
    for row in &mut config.allocator.stages {
        row.interval_secs = 0;
    }
    config
}

async fn orchestrator(dir: &Path, backend: MockBackend, store: Arc<MemoryStore>) -> Orchestrator {
    Orchestrator::builder()
        .with_config(config(dir))
        .with_backend(Arc::new(backend))
        .with_store(store)
        .build()
        .await
        .unwrap()
}

fn blueprint(name: &str) -> UnitBlueprint {
    UnitBlueprint::new(name, "Clamp numbers into range")
        .with_criterion("handles nan")
        .with_criterion("documents bounds")
        .with_capability("math")
}

async fn unit_of(orch: &Orchestrator, id: &UnitId) -> Unit {
    orch.population().get(id).await.unwrap().unit.lock().await.clone()
}

#[tokio::test]
async fn stalled_unit_is_salvaged_into_proteins() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        MockBackend::new().with_default(TESTED_MODULE),
        Arc::new(MemoryStore::new()),
    )
    .await;
    orch.create_group("numeric").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("clamp")).await.unwrap();

    for _ in 0..25 {
        orch.generate_all().await;
    }

    let unit = unit_of(&orch, &id).await;
    assert_eq!(unit.stage, Stage::Seed);
    assert_eq!(unit.fitness, 0.0);
    assert!(unit.stalled_count >= 20);
    assert!(orch.selection().is_failing(&unit));

    let reports = orch.select_all().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].reasons.contains(&FailureReason::Stalled));

    assert!(orch.population().get(&id).await.is_none());
    assert!(!orch.population().group("numeric").await.unwrap().contains(&id));

    let pool = orch.pool().read().await;
    let salvaged = pool.salvaged_from(&id);
    assert_eq!(salvaged.len(), 1);
    assert_eq!(salvaged[0].name, "clamp::clamp01");
    assert!(salvaged[0].provides.contains("math"));
}

#[tokio::test]
async fn salvage_without_qualifying_fragments_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    // The default mock module has no tests, so nothing qualifies.
    let orch = orchestrator(dir.path(), MockBackend::new(), Arc::new(MemoryStore::new())).await;
    orch.create_group("numeric").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("clamp")).await.unwrap();

    for _ in 0..25 {
        orch.generate_all().await;
    }
    assert!(orch.selection().is_failing(&unit_of(&orch, &id).await));

    let reports = orch.select_all().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].proteins.is_empty());
    assert!(orch.population().is_empty().await);
    assert!(orch.pool().read().await.salvaged_from(&id).is_empty());
}

#[tokio::test]
async fn full_cycles_salvage_once_development_time_is_spent() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), MockBackend::new(), Arc::new(MemoryStore::new())).await;
    orch.create_group("numeric").await.unwrap();
    orch.create_unit("numeric", blueprint("clamp")).await.unwrap();

    let summaries = orch.run(10).await;
    assert_eq!(summaries.len(), 10);
    assert_eq!(summaries.iter().map(|s| s.salvaged).sum::<usize>(), 1);
    // Never salvaged before it had a chance to develop.
    let first_salvage = summaries.iter().position(|s| s.salvaged == 1).unwrap();
    assert!(first_salvage >= 5);
    assert!(orch.population().is_empty().await);
}

#[tokio::test]
async fn siblings_exchange_heat() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), MockBackend::new(), Arc::new(MemoryStore::new())).await;
    orch.create_group("numeric").await.unwrap();
    let hot = orch.create_unit("numeric", blueprint("hot")).await.unwrap();
    let cold = orch.create_unit("numeric", blueprint("cold")).await.unwrap();
    orch.population().get(&hot).await.unwrap().unit.lock().await.temperature = Some(80.0);
    orch.population().get(&cold).await.unwrap().unit.lock().await.temperature = Some(20.0);

    let exchanges = orch.diffuse_all().await;
    assert_eq!(exchanges.len(), 1);
    let d = exchanges[0].amount;
    assert!(d > 0.0 && d < 60.0);

    let th = unit_of(&orch, &hot).await.temperature.unwrap();
    let tc = unit_of(&orch, &cold).await.temperature.unwrap();
    assert!((th - (80.0 - d)).abs() < 1e-9);
    assert!((tc - (20.0 + d)).abs() < 1e-9);
    let gap = th - tc;
    assert!(gap > 0.0 && gap < 60.0);
}

#[tokio::test]
async fn fresh_unit_is_never_failing() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), MockBackend::new(), Arc::new(MemoryStore::new())).await;
    orch.create_group("numeric").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("fresh")).await.unwrap();

    let unit = unit_of(&orch, &id).await;
    assert_eq!(unit.stage, Stage::Seed);
    assert_eq!(unit.stalled_count, 0);
    assert!(!orch.selection().is_failing(&unit));
    assert!(orch.select_all().await.is_empty());
}

#[tokio::test]
async fn release_refuses_unsynced_content() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), MockBackend::new(), Arc::new(MemoryStore::new())).await;
    orch.create_group("numeric").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("clamp")).await.unwrap();

    let err = orch.release(&id).await.unwrap_err();
    assert!(matches!(
        err,
        BroodError::Storage(StorageError::UnsyncedRelease { state: StorageState::Unsynced, .. })
    ));
    let unit = unit_of(&orch, &id).await;
    assert_eq!(unit.storage_state(), StorageState::Unsynced);
    assert!(unit.local_path().unwrap().exists());
}

#[tokio::test]
async fn release_and_materialize_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(dir.path(), MockBackend::new(), store.clone()).await;
    orch.create_group("numeric").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("clamp")).await.unwrap();

    let report = orch.checkpoint().await;
    assert_eq!(report.committed.len(), 1);
    orch.release(&id).await.unwrap();

    let stats = orch.stats().await;
    assert_eq!(stats.remote_only, 1);
    assert_eq!(stats.efficiency, 1.0);

    let cell = orch.population().get(&id).await.unwrap();
    let mut unit = cell.unit.lock().await;
    assert_eq!(unit.storage_state(), StorageState::Remote);
    assert!(unit.local_path().is_none());
    assert!(unit.storage_consistent());

    let first = orch.storage().materialize(&mut unit).await.unwrap();
    let second = orch.storage().materialize(&mut unit).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.fetch_count(), 1);
    assert_eq!(unit.storage_state(), StorageState::Local);
    assert!(unit.remote_ref().is_none());
    assert!(unit.storage_consistent());
}

#[tokio::test]
async fn shutdown_cancels_generation_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockBackend::new().with_delay(Duration::from_secs(30));
    let orch = orchestrator(dir.path(), backend, Arc::new(MemoryStore::new())).await;
    orch.create_group("numeric").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("clamp")).await.unwrap();
    let before = unit_of(&orch, &id).await;

    let handle = orch.shutdown_handle();
    let (steps, _) = tokio::join!(orch.generate_all(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();
    });

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].outcome, StepOutcome::Cancelled);

    let cell = orch.population().get(&id).await.unwrap();
    let mut after = cell.unit.lock().await;
    assert_eq!(after.cycles, before.cycles);
    assert_eq!(after.stalled_count, before.stalled_count);
    assert_eq!(after.stage, before.stage);
    assert_eq!(after.fitness, before.fitness);
    assert_eq!(after.history.len(), before.history.len());
    assert_eq!(after.storage_state(), StorageState::Unsynced);
    let tree = orch.storage().read_content(&mut after).await.unwrap();
    assert!(!tree.get("src/lib.rs").unwrap().contains("placeholder"));

    assert!(orch.run(3).await.is_empty());
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let state = dir.path().join("state.json");

    let orch = Orchestrator::builder()
        .with_config(config(dir.path()))
        .with_store(store.clone())
        .with_state(&state)
        .build()
        .await
        .unwrap();
    orch.create_group("numeric").await.unwrap();
    orch.create_group("spare").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("clamp")).await.unwrap();
    orch.run_cycle().await;
    let before = unit_of(&orch, &id).await;
    drop(orch);

    let orch = Orchestrator::builder()
        .with_config(config(dir.path()))
        .with_store(store)
        .with_state(&state)
        .build()
        .await
        .unwrap();
    assert_eq!(orch.population().cycle(), 1);
    assert_eq!(orch.population().group_names().await, vec!["numeric", "spare"]);

    let after = unit_of(&orch, &id).await;
    assert_eq!(after.cycles, before.cycles);
    assert_eq!(after.stalled_count, before.stalled_count);
    assert_eq!(after.storage_state(), before.storage_state());
    assert_eq!(after.remote_ref(), before.remote_ref());
    assert_eq!(after.history.len(), before.history.len());
}

#[tokio::test]
async fn char_literal_braces_do_not_block_salvage() {
    let dir = tempfile::tempdir().unwrap();
    let module = "```rust\npub fn is_open(c: char) -> bool {\n    c == '{'\n}\n\npub fn clamp01(x: f64) -> f64 {\n    x.max(0.0).min(1.0)\n}\n\n#[test]\nfn clamps() {\n    assert!(is_open('{'));\n    assert_eq!(clamp01(2.0), 1.0);\n}\n```";
    let orch = orchestrator(
        dir.path(),
        MockBackend::new().with_default(module),
        Arc::new(MemoryStore::new()),
    )
    .await;
    orch.create_group("numeric").await.unwrap();
    let id = orch.create_unit("numeric", blueprint("braces")).await.unwrap();
    orch.generate_all().await;

    let report = orch.salvage(&id).await.unwrap();
    assert_eq!(report.error, None);
    assert_eq!(report.proteins.len(), 2);
    let pool = orch.pool().read().await;
    assert!(pool.get("braces::is_open").is_some());
    assert!(pool.get("braces::clamp01").is_some());
}
