//! Durable stores: where checkpointed unit trees live.

use async_trait::async_trait;
use brood_core::content::ContentTree;
use brood_core::error::StorageError;
use brood_core::types::{RefId, UnitId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Ref-addressed put/get of a unit's full content tree.
#[async_trait]
pub trait DurableStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store the tree and return an opaque ref to it.
    async fn put(&self, unit: &UnitId, tree: &ContentTree) -> Result<RefId, StorageError>;

    /// Fetch the tree a ref points to.
    async fn get(&self, unit: &UnitId, reference: &RefId) -> Result<ContentTree, StorageError>;
}

/// In-memory, content-addressed store keyed by blake3 digests.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<RefId, ContentTree>>,
    fetches: AtomicUsize,
    puts: AtomicUsize,
    failing_puts: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `get` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make the next `n` puts fail with a backend error.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    fn digest(unit: &UnitId, tree: &ContentTree) -> RefId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(unit.as_str().as_bytes());
        for (path, text) in tree.iter() {
            hasher.update(&[0]);
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(text.as_bytes());
        }
        RefId::new(hasher.finalize().to_hex().to_string())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, unit: &UnitId, tree: &ContentTree) -> Result<RefId, StorageError> {
        let injected = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Backend(format!("put rejected for {}", unit)));
        }

        let reference = Self::digest(unit, tree);
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Backend("memory store poisoned".to_string()))?;
        objects.insert(reference.clone(), tree.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(reference)
    }

    async fn get(&self, unit: &UnitId, reference: &RefId) -> Result<ContentTree, StorageError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Backend("memory store poisoned".to_string()))?;
        let tree = objects
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(unit.clone()))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(tree)
    }
}
