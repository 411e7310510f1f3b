use std::collections::HashMap;
use std::sync::RwLock;

use cvx_types::{ComponentVersion, ObjectId};

use crate::error::{StoreError, StoreResult};
use crate::object::{Blob, VersionManifest};
use crate::traits::ObjectStore;

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. All objects are held in memory behind
/// `RwLock`s for safe concurrent access. Objects are cloned on read/write.
pub struct InMemoryObjectStore {
    blobs: RwLock<HashMap<ObjectId, Blob>>,
    manifests: RwLock<HashMap<ComponentVersion, (ObjectId, VersionManifest)>>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Number of manifests currently stored.
    pub fn manifest_count(&self) -> usize {
        self.manifests.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store holds neither blobs nor manifests.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
            && self.manifests.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|blob| blob.len() as u64)
            .sum()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put_blob(&self, blob: &Blob) -> StoreResult<ObjectId> {
        let id = blob.id();
        let mut map = self.blobs.write().expect("lock poisoned");
        map.entry(id).or_insert_with(|| blob.clone());
        Ok(id)
    }

    fn get_blob(&self, id: &ObjectId) -> StoreResult<Option<Blob>> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    fn has_blob(&self, id: &ObjectId) -> StoreResult<bool> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }

    fn put_manifest(&self, manifest: &VersionManifest) -> StoreResult<ObjectId> {
        let key = manifest.key();
        let content_id = manifest.content_id()?;
        let mut map = self.manifests.write().expect("lock poisoned");
        match map.get(&key) {
            Some((existing, _)) if *existing == content_id => Ok(content_id),
            Some(_) => Err(StoreError::ManifestConflict { key }),
            None => {
                map.insert(key, (content_id, manifest.clone()));
                Ok(content_id)
            }
        }
    }

    fn get_manifest(&self, key: &ComponentVersion) -> StoreResult<Option<VersionManifest>> {
        let map = self.manifests.read().expect("lock poisoned");
        Ok(map.get(key).map(|(_, m)| m.clone()))
    }

    fn has_manifest(&self, key: &ComponentVersion) -> StoreResult<bool> {
        let map = self.manifests.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn list_manifests(&self) -> StoreResult<Vec<ComponentVersion>> {
        let map = self.manifests.read().expect("lock poisoned");
        let mut keys: Vec<ComponentVersion> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn blob_count(&self) -> StoreResult<usize> {
        Ok(self.blobs.read().expect("lock poisoned").len())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("blob_count", &self.blobs.read().expect("lock poisoned").len())
            .field("manifest_count", &self.manifest_count())
            .finish()
    }
}
