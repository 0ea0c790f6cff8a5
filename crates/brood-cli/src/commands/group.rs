//! Manage groups.

use anyhow::Result;
use colored::Colorize;

use super::{open, save};
use crate::Globals;

pub async fn create(globals: &Globals, name: &str) -> Result<()> {
    let (_, orch) = open(globals).await?;
    orch.create_group(name).await?;
    save(&orch).await?;
    println!("{} Created group {}", "✓".green(), name.cyan());
    Ok(())
}

pub async fn remove(globals: &Globals, name: &str) -> Result<()> {
    let (_, orch) = open(globals).await?;
    orch.remove_group(name).await?;
    save(&orch).await?;
    println!("{} Removed group {}", "✓".green(), name.cyan());
    Ok(())
}

pub async fn list(globals: &Globals, json: bool) -> Result<()> {
    let (_, orch) = open(globals).await?;
    let groups = orch.groups().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }
    if groups.is_empty() {
        println!("{} No groups yet. Run {}", "•".yellow(), "brood group create <name>".cyan());
        return Ok(());
    }

    println!(
        "{:<24} {:>8} {:>11} {:>8}",
        "GROUP".bold(),
        "MEMBERS".bold(),
        "SIMILARITY".bold(),
        "BUDGET".bold()
    );
    for g in groups {
        println!("{:<24} {:>8} {:>11.3} {:>8.1}", g.name, g.members, g.similarity, g.budget);
    }
    Ok(())
}
