use std::collections::BTreeMap;

use cvx_types::{ComponentVersion, ObjectId};

use crate::error::StoreResult;
use crate::object::{Blob, VersionManifest};
use crate::traits::ObjectStore;

/// Buffered writes of one transaction: blobs keyed by id, manifests keyed by
/// `(ComponentId, Version)`.
///
/// Nothing in a batch is visible to readers until a scope applies it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    blobs: BTreeMap<ObjectId, Blob>,
    manifests: BTreeMap<ComponentVersion, VersionManifest>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a blob and return its id. Duplicate content is kept once.
    pub fn add_blob(&mut self, blob: Blob) -> ObjectId {
        let id = blob.id();
        self.blobs.entry(id).or_insert(blob);
        id
    }

    /// Buffer a manifest, replacing any earlier manifest under the same key.
    pub fn add_manifest(&mut self, manifest: VersionManifest) {
        self.manifests.insert(manifest.key(), manifest);
    }

    pub fn blob(&self, id: &ObjectId) -> Option<&Blob> {
        self.blobs.get(id)
    }

    pub fn manifest(&self, key: &ComponentVersion) -> Option<&VersionManifest> {
        self.manifests.get(key)
    }

    pub fn contains_blob(&self, id: &ObjectId) -> bool {
        self.blobs.contains_key(id)
    }

    pub fn contains_manifest(&self, key: &ComponentVersion) -> bool {
        self.manifests.contains_key(key)
    }

    /// Blobs in id order.
    pub fn blobs(&self) -> impl Iterator<Item = &Blob> {
        self.blobs.values()
    }

    /// Manifests in ascending `(ComponentId, Version)` order.
    pub fn manifests(&self) -> impl Iterator<Item = &VersionManifest> {
        self.manifests.values()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn manifest_count(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty() && self.manifests.is_empty()
    }

    /// Blob references that neither this batch nor `store` can satisfy,
    /// as `(manifest key, blob id)` pairs.
    pub fn missing_blobs(
        &self,
        store: &dyn ObjectStore,
    ) -> StoreResult<Vec<(ComponentVersion, ObjectId)>> {
        let mut missing = Vec::new();
        for manifest in self.manifests.values() {
            for id in manifest.blob_ids() {
                if !self.blobs.contains_key(&id) && !store.has_blob(&id)? {
                    missing.push((manifest.key(), id));
                }
            }
        }
        Ok(missing)
    }

    /// Merge `other` into this batch.
    pub fn extend(&mut self, other: WriteBatch) {
        self.blobs.extend(other.blobs);
        self.manifests.extend(other.manifests);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryObjectStore;

    fn manifest(key: &str) -> VersionManifest {
        let key: ComponentVersion = key.parse().unwrap();
        VersionManifest::new(key.id, key.version)
    }

    #[test]
    fn add_blob_deduplicates() {
        let mut batch = WriteBatch::new();
        let a = batch.add_blob(Blob::new(b"same".to_vec()));
        let b = batch.add_blob(Blob::new(b"same".to_vec()));
        assert_eq!(a, b);
        assert_eq!(batch.blob_count(), 1);
    }

    #[test]
    fn manifests_iterate_in_key_order() {
        let mut batch = WriteBatch::new();
        batch.add_manifest(manifest("bar/foo@0.0.2"));
        batch.add_manifest(manifest("bar/foo@0.0.1"));
        let keys: Vec<String> = batch.manifests().map(|m| m.key().to_string()).collect();
        assert_eq!(keys, vec!["bar/foo@0.0.1", "bar/foo@0.0.2"]);
    }

    #[test]
    fn missing_blobs_consults_batch_then_store() {
        let store = InMemoryObjectStore::new();
        let stored = store.put_blob(&Blob::new(b"in store".to_vec())).unwrap();

        let mut batch = WriteBatch::new();
        let buffered = batch.add_blob(Blob::new(b"in batch".to_vec()));
        let absent = Blob::new(b"nowhere".to_vec()).id();
        batch.add_manifest(
            manifest("bar/foo@0.0.1")
                .with_file("a", stored)
                .with_file("b", buffered)
                .with_file("c", absent),
        );

        let missing = batch.missing_blobs(&store).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].1, absent);
    }

    #[test]
    fn extend_merges() {
        let mut a = WriteBatch::new();
        a.add_manifest(manifest("bar/a@0.0.1"));
        let mut b = WriteBatch::new();
        b.add_manifest(manifest("bar/b@0.0.1"));
        b.add_blob(Blob::new(b"x".to_vec()));
        a.extend(b);
        assert_eq!(a.manifest_count(), 2);
        assert_eq!(a.blob_count(), 1);
        assert!(!a.is_empty());
    }
}
