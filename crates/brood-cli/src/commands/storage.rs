//! Per-unit lifecycle commands: salvage, release, checkpoint, promote.

use anyhow::Result;
use brood::prelude::*;
use colored::Colorize;

use super::{open, save};
use crate::Globals;

pub async fn salvage(globals: &Globals, unit: &str) -> Result<()> {
    let (_, orch) = open(globals).await?;
    let report = orch.salvage(&UnitId::new(unit)).await?;
    save(&orch).await?;

    println!("{} Salvaged {} from {}", "✓".green(), report.unit.to_string().cyan(), report.group);
    if !report.reasons.is_empty() {
        let reasons: Vec<String> = report.reasons.iter().map(|r| r.to_string()).collect();
        println!("  Failing: {}", reasons.join(", ").yellow());
    }
    if let Some(error) = &report.error {
        println!("  {} {}", "•".yellow(), error);
    }
    if report.proteins.is_empty() {
        println!("  No qualifying fragments");
    }
    for name in &report.proteins {
        println!("  {} {}", "+".green(), name);
    }
    Ok(())
}

pub async fn release(globals: &Globals, unit: &str) -> Result<()> {
    let (_, orch) = open(globals).await?;
    orch.release(&UnitId::new(unit)).await?;
    save(&orch).await?;
    println!("{} Released {}", "✓".green(), unit.cyan());
    Ok(())
}

pub async fn checkpoint(globals: &Globals) -> Result<()> {
    let (_, orch) = open(globals).await?;
    let report = orch.checkpoint().await;
    save(&orch).await?;

    for (id, reference) in &report.committed {
        println!("  {} {} @ {}", "✓".green(), id, reference);
    }
    for (id, error) in &report.failed {
        println!("  {} {}: {}", "✗".red(), id, error);
    }
    println!(
        "{} Checkpoint: {} committed, {} failed",
        "→".blue(),
        report.committed.len().to_string().green(),
        report.failed.len().to_string().red()
    );
    Ok(())
}

pub async fn promote(globals: &Globals, unit: &str) -> Result<()> {
    let (_, orch) = open(globals).await?;
    let promoted = orch.promote(&UnitId::new(unit)).await?;
    save(&orch).await?;

    println!(
        "{} Promoted {} (fitness {:.2})",
        "✓".green().bold(),
        promoted.id.to_string().cyan(),
        promoted.fitness
    );
    if let Some(path) = promoted.local_path() {
        println!("  Working copy: {}", path.display());
    }
    if let Some(reference) = promoted.remote_ref() {
        println!("  Committed:    {}", reference);
    }
    Ok(())
}
