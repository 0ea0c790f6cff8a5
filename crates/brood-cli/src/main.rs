//! Brood CLI - administer a population of code modules under development.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "brood")]
#[command(author, version, about = "Brood - grow code modules in parallel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to brood.toml (default: search the current and parent directories)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the population state file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Flags shared by every command.
pub struct Globals {
    pub config: Option<PathBuf>,
    pub state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new brood project
    Init {
        /// Project directory (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Manage groups of sibling units
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Manage units
    Unit {
        #[command(subcommand)]
        command: UnitCommands,
    },

    /// List every unit
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run development cycles
    Run {
        /// Number of cycles to run
        #[arg(short, long, default_value = "1")]
        cycles: u64,

        /// Generation backend: mock, ollama or claude
        #[arg(short, long, default_value = "mock")]
        backend: String,
    },

    /// Salvage a unit into proteins and remove it
    Salvage {
        /// Unit id
        unit: String,
    },

    /// Drop a unit's local working copy, keeping the committed content
    Release {
        /// Unit id
        unit: String,
    },

    /// Commit every unit with local changes
    Checkpoint,

    /// Take a mature, accepted unit out of the population
    Promote {
        /// Unit id
        unit: String,
    },

    /// Manage the protein pool
    Proteins {
        #[command(subcommand)]
        command: ProteinCommands,
    },

    /// Show population and storage statistics
    Stats {
        /// Print JSON instead of a report
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create an empty group
    Create {
        /// Group name
        name: String,
    },

    /// Remove an empty group
    Remove {
        /// Group name
        name: String,
    },

    /// List groups with member counts and similarity
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UnitCommands {
    /// Create a unit from a blueprint file
    Create {
        /// Group to join
        #[arg(short, long)]
        group: String,

        /// Blueprint TOML file
        #[arg(short, long)]
        blueprint: PathBuf,

        /// Grow a Python lead and a Rust unit that translates it
        #[arg(long)]
        pair: bool,
    },
}

#[derive(Subcommand)]
enum ProteinCommands {
    /// List proteins in the pool
    List {
        #[arg(long)]
        json: bool,
    },

    /// Import authored proteins from a file or directory
    Import {
        /// Protein file or directory of protein files
        path: PathBuf,
    },

    /// Write one protein to a file in the authored format
    Export {
        /// Protein name
        name: String,

        /// Output file
        output: PathBuf,
    },

    /// Remove a protein from the pool
    Prune {
        /// Protein name
        name: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "brood_runtime=debug,brood_llm=debug,brood=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let globals = Globals {
        config: cli.config,
        state: cli.state,
    };

    match cli.command {
        Commands::Init { path } => commands::init::run(path),
        Commands::Group { command } => match command {
            GroupCommands::Create { name } => commands::group::create(&globals, &name).await,
            GroupCommands::Remove { name } => commands::group::remove(&globals, &name).await,
            GroupCommands::List { json } => commands::group::list(&globals, json).await,
        },
        Commands::Unit { command } => match command {
            UnitCommands::Create { group, blueprint, pair } => {
                commands::unit::create(&globals, &group, &blueprint, pair).await
            }
        },
        Commands::List { json } => commands::unit::list(&globals, json).await,
        Commands::Run { cycles, backend } => commands::run::run(&globals, cycles, &backend).await,
        Commands::Salvage { unit } => commands::storage::salvage(&globals, &unit).await,
        Commands::Release { unit } => commands::storage::release(&globals, &unit).await,
        Commands::Checkpoint => commands::storage::checkpoint(&globals).await,
        Commands::Promote { unit } => commands::storage::promote(&globals, &unit).await,
        Commands::Proteins { command } => match command {
            ProteinCommands::List { json } => commands::proteins::list(&globals, json).await,
            ProteinCommands::Import { path } => commands::proteins::import(&globals, &path).await,
            ProteinCommands::Export { name, output } => {
                commands::proteins::export(&globals, &name, &output).await
            }
            ProteinCommands::Prune { name } => commands::proteins::prune(&globals, &name).await,
        },
        Commands::Stats { json } => commands::stats::run(&globals, json).await,
    }
}
