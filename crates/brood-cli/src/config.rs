//! Project discovery for the brood CLI.
//!
//! A project is a directory holding `brood.toml`. Relative paths in the
//! config (work root, git root, state file) resolve against that directory.

use anyhow::{Context, Result};
use brood::runtime::config::{BroodConfig, StoreKind};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "brood.toml";

/// A loaded project: where it lives and how it is configured.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub config: BroodConfig,
    pub state_path: PathBuf,
}

impl Project {
    /// Load from an explicit config path, or search the current and parent
    /// directories, falling back to the per-user nest.
    pub fn load(config: Option<&Path>, state: Option<&Path>) -> Result<Self> {
        let config_path = match config {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let (root, mut config) = match &config_path {
            Some(path) => {
                let config = BroodConfig::load(path)
                    .with_context(|| format!("Failed to load config: {}", path.display()))?;
                let root = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => std::env::current_dir()?,
                };
                (root, config)
            }
            None => (nest_dir()?, BroodConfig::default()),
        };

        resolve_paths(&mut config, &root);
        let state_path = match state {
            Some(path) => path.to_path_buf(),
            None => config.orchestrator.state_file.clone(),
        };

        Ok(Self {
            root,
            config_path,
            config,
            state_path,
        })
    }

    pub fn is_memory_backed(&self) -> bool {
        self.config.storage.store == StoreKind::Memory
    }
}

/// Anchor relative storage and state paths at `root`.
pub fn resolve_paths(config: &mut BroodConfig, root: &Path) {
    let anchor = |path: &mut PathBuf| {
        if path.is_relative() {
            *path = root.join(&*path);
        }
    };
    anchor(&mut config.storage.work_root);
    anchor(&mut config.storage.git_root);
    anchor(&mut config.orchestrator.state_file);
}

/// Config written by `brood init`: defaults, with the git store so content
/// outlives the process.
pub fn default_toml() -> Result<String> {
    let mut config = BroodConfig::default();
    config.storage.store = StoreKind::Git;
    toml::to_string_pretty(&config).context("Failed to serialize config")
}

/// Find brood.toml in the current or parent directories.
fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

/// Per-user nest used outside any project.
pub fn nest_dir() -> Result<PathBuf> {
    match dirs::data_local_dir() {
        Some(dir) => Ok(dir.join("brood")),
        None => Ok(std::env::current_dir()?.join(".brood")),
    }
}
