//! Run development cycles.

use anyhow::{bail, Result};
use brood::prelude::*;
use colored::Colorize;
use std::sync::Arc;
use tracing::warn;

use super::open_with;
use crate::Globals;

/// Pick a generation backend by name.
fn backend(name: &str) -> Result<Arc<dyn GenerationBackend>> {
    match name {
        "mock" => Ok(Arc::new(MockBackend::new())),
        #[cfg(feature = "local")]
        "ollama" => Ok(Arc::new(OllamaBackend::localhost())),
        #[cfg(feature = "api")]
        "claude" => Ok(Arc::new(ClaudeBackend::from_env()?)),
        #[cfg(not(feature = "local"))]
        "ollama" => bail!("backend ollama is not compiled in; rebuild with --features local"),
        #[cfg(not(feature = "api"))]
        "claude" => bail!("backend claude is not compiled in; rebuild with --features api"),
        other => bail!("unknown backend {} (expected mock, ollama or claude)", other),
    }
}

pub async fn run(globals: &Globals, cycles: u64, backend_name: &str) -> Result<()> {
    let (_, orch) = open_with(globals, Some(backend(backend_name)?)).await?;

    if orch.population().is_empty().await {
        bail!("No units to develop. Run {} first.", "brood unit create".cyan());
    }

    let handle = orch.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current cycle");
            handle.shutdown();
        }
    });

    println!(
        "{} Running {} cycle(s) over {} unit(s) with the {} backend...",
        "→".blue(),
        cycles.to_string().cyan(),
        orch.population().len().await.to_string().cyan(),
        backend_name.cyan()
    );

    let summaries = orch.run(cycles).await;
    for summary in &summaries {
        let line = summary.to_string();
        if summary.generation_errors > 0 || summary.degraded > 0 {
            println!("  {} {}", "•".yellow(), line);
        } else {
            println!("  {} {}", "✓".green(), line);
        }
    }

    let salvaged: usize = summaries.iter().map(|s| s.salvaged).sum();
    let harvested: usize = summaries.iter().map(|s| s.proteins_harvested).sum();
    println!();
    println!("{} Ran {} cycle(s)", "✓".green().bold(), summaries.len());
    println!(
        "  Units: {}  Salvaged: {}  Proteins harvested: {}",
        orch.population().len().await.to_string().cyan(),
        salvaged.to_string().yellow(),
        harvested.to_string().green()
    );
    Ok(())
}
