use cvx_types::{ComponentVersion, ObjectId};

use crate::error::{StoreError, StoreResult};
use crate::object::{Blob, VersionManifest};

/// Content-addressed object store of one scope.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable and keyed by their content hash; putting the same
///   bytes twice returns the same id and stores one object.
/// - Manifests are keyed by `(ComponentId, Version)` and are write-if-absent:
///   identical content is a no-op, different content is
///   [`StoreError::ManifestConflict`].
/// - Concurrent reads are always safe (objects are immutable).
/// - All I/O errors are propagated, never silently ignored.
///
/// The store does not order writes across objects. Callers that need the
/// "no manifest without its blobs" guarantee write blobs first and only then
/// manifests, as `Scope::apply_batch` does.
pub trait ObjectStore: Send + Sync {
    /// Store a blob and return its content-addressed id. Idempotent.
    fn put_blob(&self, blob: &Blob) -> StoreResult<ObjectId>;

    /// Read a blob by id. Returns `Ok(None)` if the blob does not exist.
    fn get_blob(&self, id: &ObjectId) -> StoreResult<Option<Blob>>;

    /// Check whether a blob exists.
    fn has_blob(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Store a manifest under its key and return its content id.
    fn put_manifest(&self, manifest: &VersionManifest) -> StoreResult<ObjectId>;

    /// Read a manifest by key. Returns `Ok(None)` if it does not exist.
    fn get_manifest(&self, key: &ComponentVersion) -> StoreResult<Option<VersionManifest>>;

    /// Check whether a manifest exists under `key`.
    fn has_manifest(&self, key: &ComponentVersion) -> StoreResult<bool>;

    /// Keys of every stored manifest, sorted.
    fn list_manifests(&self) -> StoreResult<Vec<ComponentVersion>>;

    /// Number of distinct blobs stored.
    fn blob_count(&self) -> StoreResult<usize>;

    /// Read a blob, treating absence as [`StoreError::NotFound`].
    fn require_blob(&self, id: &ObjectId) -> StoreResult<Blob> {
        self.get_blob(id)?.ok_or(StoreError::NotFound(*id))
    }

    /// Read a manifest, treating absence as [`StoreError::ManifestNotFound`].
    fn require_manifest(&self, key: &ComponentVersion) -> StoreResult<VersionManifest> {
        self.get_manifest(key)?
            .ok_or_else(|| StoreError::ManifestNotFound(key.clone()))
    }

    /// Store several blobs and return their ids.
    ///
    /// Default implementation calls `put_blob()` for each blob. Backends may
    /// override for better performance (e.g., single fsync).
    fn put_blobs(&self, blobs: &[Blob]) -> StoreResult<Vec<ObjectId>> {
        blobs.iter().map(|blob| self.put_blob(blob)).collect()
    }
}
