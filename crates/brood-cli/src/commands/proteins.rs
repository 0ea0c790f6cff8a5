//! Inspect and curate the protein pool.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::Path;

use super::{open, save};
use crate::Globals;

pub async fn list(globals: &Globals, json: bool) -> Result<()> {
    let (_, orch) = open(globals).await?;
    let pool = orch.pool().read().await;

    if json {
        let proteins: Vec<_> = pool.iter().collect();
        println!("{}", serde_json::to_string_pretty(&proteins)?);
        return Ok(());
    }
    if pool.is_empty() {
        println!("{} The protein pool is empty", "•".yellow());
        return Ok(());
    }

    println!(
        "{:<32} {:<10} {:>7} {:<24} {}",
        "PROTEIN".bold(),
        "KIND".bold(),
        "QUALITY".bold(),
        "ORIGIN".bold(),
        "PROVIDES".bold()
    );
    for p in pool.iter() {
        let provides: Vec<&str> = p.provides.iter().map(String::as_str).collect();
        println!(
            "{:<32} {:<10} {:>7.2} {:<24} {}",
            p.name,
            p.kind.as_str(),
            p.quality_signal,
            p.origin.to_string(),
            provides.join(", ")
        );
    }
    Ok(())
}

pub async fn import(globals: &Globals, path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }
    let (_, orch) = open(globals).await?;
    let added = orch.import_proteins(path).await?;
    save(&orch).await?;
    println!("{} Imported {} protein(s) from {}", "✓".green(), added.to_string().cyan(), path.display());
    Ok(())
}

pub async fn export(globals: &Globals, name: &str, output: &Path) -> Result<()> {
    let (_, orch) = open(globals).await?;
    let written = orch
        .pool()
        .read()
        .await
        .save_protein(name, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if !written {
        bail!("No protein named {}", name);
    }
    println!("{} Wrote {} to {}", "✓".green(), name.cyan(), output.display());
    Ok(())
}

pub async fn prune(globals: &Globals, name: &str) -> Result<()> {
    let (_, orch) = open(globals).await?;
    match orch.prune_protein(name).await {
        Some(_) => {
            save(&orch).await?;
            println!("{} Pruned {}", "✓".green(), name.cyan());
            Ok(())
        }
        None => bail!("No protein named {}", name),
    }
}
