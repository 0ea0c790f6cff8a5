//! Show population and storage statistics.

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use super::open;
use crate::Globals;

pub async fn run(globals: &Globals, json: bool) -> Result<()> {
    let (project, orch) = open(globals).await?;
    let storage = orch.stats().await;
    let groups = orch.groups().await;
    let proteins = orch.pool().read().await.len();
    let cycle = orch.population().cycle();
    let next = orch.next_eligible().await;
    let budget: f64 = groups.iter().map(|g| g.budget).sum();
    let (extractor, adapter) = orch.diffusion().strategies();

    if json {
        let value = json!({
            "cycle": cycle,
            "next_unit": next,
            "budget": budget,
            "extractor": extractor,
            "adapter": adapter,
            "groups": groups,
            "proteins": proteins,
            "storage": storage,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", "Brood Statistics".white().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  Root:              {}", project.root.display());
    match &project.config_path {
        Some(path) => println!("  Config:            {}", path.display()),
        None => println!("  Config:            {}", "defaults".dimmed()),
    }
    println!("  Cycle:             {}", cycle.to_string().cyan());
    println!();

    println!("{}", "Population".blue().bold());
    println!("  Units:             {}", storage.total.to_string().cyan());
    println!("  Groups:            {}", groups.len().to_string().cyan());
    println!("  Proteins:          {}", proteins.to_string().cyan());
    println!("  Budget:            {:.1}", budget);
    match &next {
        Some(id) => println!("  Next up:           {}", id.to_string().cyan()),
        None => println!("  Next up:           {}", "none".dimmed()),
    }
    println!("  Fragments:         {} extractor, {} adapter", extractor, adapter);
    println!();

    println!("{}", "Storage".blue().bold());
    println!("  Materialized:      {}", storage.local.to_string().cyan());
    println!("  Remote only:       {}", storage.remote_only.to_string().cyan());
    println!("  Synced:            {}", storage.synced.to_string().green());
    println!("  Unsynced:          {}", storage.unsynced.to_string().yellow());
    println!("  Efficiency:        {:.1}%", storage.efficiency * 100.0);
    println!();
    println!("{}", "═".repeat(40).dimmed());

    Ok(())
}
