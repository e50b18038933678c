//! Content-addressed result cache
//!
//! A node instance's outputs are stored under a BLAKE3 digest of its
//! identity, its executor kind and version, and its fully resolved inputs.
//! Changed inputs produce a new key. An existing key is only rewritten
//! with the same outputs, or to replace an entry that no longer decodes.
//!
//! Stores only move bytes. [`ResultCache`] handles the entry encoding and
//! treats undecodable entries as misses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ValueMap;

/// Byte-level storage for cache entries
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store an entry. Writing the same key twice must be harmless.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// In-process cache store
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        // Same-key writes carry the same outputs; replacing also repairs
        // an entry that no longer decodes.
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Cache store keeping one JSON file per key
///
/// Writes go to a uniquely named temporary file that is then renamed into
/// place, so concurrent writers of the same key converge on one complete file.
pub struct DirectoryCache {
    root: PathBuf,
}

impl DirectoryCache {
    /// Open (and create if needed) a cache directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        log::debug!("Opened cache directory {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }
}

impl CacheStore for DirectoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let temp = self
            .root
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        std::fs::write(&temp, bytes)?;
        if let Err(e) = std::fs::rename(&temp, self.entry_path(key)) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Everything that determines a node instance's outputs
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyMaterial<'a> {
    node_id: &'a str,
    kind: &'a str,
    version: &'a str,
    inputs: &'a ValueMap,
}

/// Compute the cache key for a node instance.
///
/// Input maps are sorted (`BTreeMap` at the top level, and serde_json's
/// default ordered map below), so equal inputs always serialize to equal
/// bytes.
pub fn cache_key(node_id: &str, kind: &str, version: &str, inputs: &ValueMap) -> Result<String> {
    let material = serde_json::to_vec(&KeyMaterial {
        node_id,
        kind,
        version,
        inputs,
    })?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&material);
    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    outputs: ValueMap,
}

/// Typed view over a [`CacheStore`]
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Look up stored outputs. Unreadable or corrupt entries count as misses.
    pub fn lookup(&self, key: &str) -> Option<ValueMap> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Cache read for {} failed, treating as miss: {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.key == key => Some(entry.outputs),
            Ok(_) => {
                log::warn!("Cache entry {} is stored under the wrong key, ignoring it", key);
                None
            }
            Err(e) => {
                log::warn!("Cache entry {} is corrupt, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Persist outputs. Failures are logged, never fatal to the run.
    pub fn insert(&self, key: &str, outputs: &ValueMap) {
        let entry = CacheEntry {
            key: key.to_string(),
            outputs: outputs.clone(),
        };
        let result = serde_json::to_vec(&entry)
            .map_err(Into::into)
            .and_then(|bytes| self.store.put(key, &bytes));
        if let Err(e) = result {
            log::warn!("Failed to store cache entry {}: {}", key, e);
        }
    }
}
