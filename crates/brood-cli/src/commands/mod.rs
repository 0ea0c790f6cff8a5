//! CLI command implementations.

pub mod group;
pub mod init;
pub mod proteins;
pub mod run;
pub mod stats;
pub mod storage;
pub mod unit;

use anyhow::{Context, Result};
use brood::prelude::*;
use std::sync::Arc;
use tracing::info;

use crate::config::Project;
use crate::Globals;

/// Load the project and its state into an orchestrator.
pub async fn open(globals: &Globals) -> Result<(Project, Orchestrator)> {
    open_with(globals, None).await
}

/// Like [`open`], with an explicit generation backend.
pub async fn open_with(
    globals: &Globals,
    backend: Option<Arc<dyn GenerationBackend>>,
) -> Result<(Project, Orchestrator)> {
    let mut project = Project::load(globals.config.as_deref(), globals.state.as_deref())?;
    if project.is_memory_backed() {
        // Nothing would bring released content back in the next invocation.
        project.config.orchestrator.auto_release = false;
        info!("Using the in-memory store; run `brood init` for a durable one");
    }

    let mut builder = Orchestrator::builder()
        .with_config(project.config.clone())
        .with_state(&project.state_path);
    if let Some(backend) = backend {
        builder = builder.with_backend(backend);
    }
    let orchestrator = builder
        .build()
        .await
        .with_context(|| format!("Failed to open brood at {}", project.root.display()))?;
    Ok((project, orchestrator))
}

/// Save state after a mutating command.
pub async fn save(orchestrator: &Orchestrator) -> Result<()> {
    orchestrator.persist().await.context("Failed to save state")
}
