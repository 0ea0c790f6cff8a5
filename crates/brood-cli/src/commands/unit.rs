//! Create and list units.

use anyhow::{Context, Result};
use brood::prelude::*;
use colored::Colorize;
use std::path::Path;

use super::{open, save};
use crate::Globals;

pub async fn create(globals: &Globals, group: &str, blueprint: &Path, pair: bool) -> Result<()> {
    let bp = UnitBlueprint::load(blueprint)
        .with_context(|| format!("Failed to load blueprint: {}", blueprint.display()))?;

    let (_, orch) = open(globals).await?;
    if pair {
        let (lead, follower) = orch.create_pair(group, bp).await?;
        save(&orch).await?;
        println!(
            "{} Created pair {} {} {} in {}",
            "✓".green(),
            lead.to_string().cyan(),
            "→".blue(),
            follower.to_string().cyan(),
            group.cyan()
        );
        return Ok(());
    }

    let id = orch.create_unit(group, bp).await?;
    save(&orch).await?;

    println!("{} Created unit {} in {}", "✓".green(), id.to_string().cyan(), group.cyan());
    Ok(())
}

pub async fn list(globals: &Globals, json: bool) -> Result<()> {
    let (_, orch) = open(globals).await?;
    let units = orch.list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(());
    }
    if units.is_empty() {
        println!("{} No units yet. Run {}", "•".yellow(), "brood unit create".cyan());
        return Ok(());
    }

    println!(
        "{:<20} {:<14} {:<10} {:>7} {:>6} {:<9} {:>7} {:>6}",
        "UNIT".bold(),
        "GROUP".bold(),
        "STAGE".bold(),
        "FITNESS".bold(),
        "TEMP".bold(),
        "STORAGE".bold(),
        "STALLED".bold(),
        "CYCLES".bold(),
    );
    for u in units {
        let temp = u.temperature.map(|t| format!("{:.1}", t)).unwrap_or_else(|| "-".to_string());
        let storage = if u.degraded {
            format!("{}!", u.storage_state).red().to_string()
        } else {
            u.storage_state.to_string()
        };
        println!(
            "{:<20} {:<14} {:<10} {:>7.3} {:>6} {:<9} {:>7} {:>6}",
            u.id.to_string(),
            u.group,
            u.stage.to_string(),
            u.fitness,
            temp,
            storage,
            u.stalled_count,
            u.cycles,
        );
    }
    Ok(())
}
