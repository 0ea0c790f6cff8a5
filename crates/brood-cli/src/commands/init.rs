//! Initialize a new brood project.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::{default_toml, CONFIG_FILE};

pub fn run(path: Option<PathBuf>) -> Result<()> {
    let base_path = match path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };

    println!("{} Initializing brood project...", "→".blue());

    let brood_dir = base_path.join(".brood");
    for dir in [brood_dir.join("work"), brood_dir.join("store"), brood_dir.join("proteins")] {
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        println!("  {} Created {}", "✓".green(), dir.display());
    }

    let config_path = base_path.join(CONFIG_FILE);
    if !config_path.exists() {
        std::fs::write(&config_path, default_toml()?)
            .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        println!("  {} Created {}", "✓".green(), config_path.display());
    } else {
        println!("  {} {} already exists", "•".yellow(), config_path.display());
    }

    let gitignore_path = brood_dir.join(".gitignore");
    if !gitignore_path.exists() {
        std::fs::write(&gitignore_path, "work/\nstate.json\n")?;
        println!("  {} Created {}", "✓".green(), gitignore_path.display());
    }

    println!();
    println!("{} Brood project initialized!", "✓".green().bold());
    println!();
    println!("Next steps:");
    println!("  {} brood group create <name>", "1.".blue());
    println!("  {} brood unit create --group <name> --blueprint <file.toml>", "2.".blue());
    println!("  {} brood run --cycles 10", "3.".blue());

    Ok(())
}
