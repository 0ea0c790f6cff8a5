//! Git-backed durable store.
//!
//! Each unit's tree lives under `<root>/<unit>/` in a single repository.
//! A put writes the tree, commits it, and returns the commit id; a get
//! reads the tree back out of that commit without touching the worktree.

use super::store::DurableStore;
use async_trait::async_trait;
use brood_core::content::ContentTree;
use brood_core::error::StorageError;
use brood_core::types::{RefId, UnitId};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct GitStore {
    root: PathBuf,
    // Serializes worktree writes; reads go straight to the object database.
    write_lock: Mutex<()>,
}

impl GitStore {
    /// Open the repository at `root`, initialising it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let store = Self {
            root,
            write_lock: Mutex::new(()),
        };
        if !store.root.join(".git").exists() {
            store.git(&["init", "--quiet"]).await?;
            info!("Initialised git store at {}", store.root.display());
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> Result<String, StorageError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["-c", "user.name=brood", "-c", "user.email=brood@localhost"])
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(StorageError::Backend(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DurableStore for GitStore {
    fn name(&self) -> &str {
        "git"
    }

    async fn put(&self, unit: &UnitId, tree: &ContentTree) -> Result<RefId, StorageError> {
        let _guard = self.write_lock.lock().await;

        let dir = self.root.join(unit.as_str());
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        for (path, text) in tree.iter() {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, text).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;

        self.git(&["add", "-A", "--", unit.as_str()]).await?;
        let message = format!("brood: {} checkpoint", unit);
        self.git(&["commit", "--quiet", "--allow-empty", "-m", message.as_str()]).await?;
        let head = self.git(&["rev-parse", "HEAD"]).await?;
        let reference = RefId::new(head.trim());
        debug!("Committed {} as {}", unit, reference.short());
        Ok(reference)
    }

    async fn get(&self, unit: &UnitId, reference: &RefId) -> Result<ContentTree, StorageError> {
        let prefix = format!("{}/", unit);
        let listing = self
            .git(&["ls-tree", "-r", "--name-only", reference.0.as_str(), "--", prefix.as_str()])
            .await
            .map_err(|_| StorageError::NotFound(unit.clone()))?;

        let mut tree = ContentTree::new();
        for path in listing.lines().filter(|l| !l.is_empty()) {
            let spec = format!("{}:{}", reference.0, path);
            let text = self.git(&["show", spec.as_str()]).await?;
            let relative = path.strip_prefix(&prefix).unwrap_or(path);
            tree.insert(relative, text);
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn commit_and_read_back() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::open(dir.path().join("store")).await.unwrap();
        let id = UnitId::new("lexer");
        let tree = ContentTree::new()
            .with_file("src/lib.rs", "pub fn lex() {}\n")
            .with_file("README.md", "# lexer\n");

        let r1 = store.put(&id, &tree).await.unwrap();
        let back = store.get(&id, &r1).await.unwrap();
        assert_eq!(back, tree);

        let next = ContentTree::new().with_file("src/lib.rs", "pub fn lex2() {}\n");
        let r2 = store.put(&id, &next).await.unwrap();
        assert_ne!(r1, r2);
        assert_eq!(store.get(&id, &r2).await.unwrap(), next);
        // Older commits stay readable.
        assert_eq!(store.get(&id, &r1).await.unwrap(), tree);

        let log = store.git(&["log", "-1", "--format=%s"]).await.unwrap();
        assert_eq!(log.trim(), "brood: lexer checkpoint");
    }
}
