use std::sync::{Arc, Mutex};

use cvx_graph::{AppendOutcome, InMemoryVersionGraph, VersionGraph};
use cvx_store::{Blob, InMemoryObjectStore, ObjectStore, VersionManifest, WriteBatch};
use cvx_types::{ComponentId, ComponentVersion, ObjectId, ScopeName, Version};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

/// One component as seen by a scope listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentSummary {
    pub id: ComponentId,
    pub latest: Version,
    /// Every version held, ascending.
    pub versions: Vec<Version>,
}

/// An independent object store plus its version-graph index.
///
/// Scopes are plain values: any number of them may live in one process. The
/// unnamed scope returned by [`Scope::local`] is a workspace's private cache;
/// every other scope is addressable by name.
pub struct Scope {
    name: Option<ScopeName>,
    store: Arc<dyn ObjectStore>,
    graph: InMemoryVersionGraph,
    commit_lock: Mutex<()>,
}

impl Scope {
    /// A named scope backed by a fresh in-memory store.
    pub fn in_memory(name: ScopeName) -> Self {
        Self {
            graph: InMemoryVersionGraph::new(Some(name.clone())),
            name: Some(name),
            store: Arc::new(InMemoryObjectStore::new()),
            commit_lock: Mutex::new(()),
        }
    }

    /// A named scope over an existing store. The version graph is rebuilt
    /// from the manifests already in `store`.
    pub fn open(name: ScopeName, store: Arc<dyn ObjectStore>) -> SyncResult<Self> {
        let graph = InMemoryVersionGraph::from_store(Some(name.clone()), store.as_ref())?;
        Ok(Self {
            name: Some(name),
            store,
            graph,
            commit_lock: Mutex::new(()),
        })
    }

    /// The unnamed workspace scope, in memory.
    pub fn local() -> Self {
        Self {
            name: None,
            store: Arc::new(InMemoryObjectStore::new()),
            graph: InMemoryVersionGraph::new(None),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> Option<&ScopeName> {
        self.name.as_ref()
    }

    /// The scope name, or `local` for the workspace scope.
    pub fn label(&self) -> &str {
        self.name.as_ref().map_or("local", |n| n.as_str())
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn graph(&self) -> &dyn VersionGraph {
        &self.graph
    }

    /// Whether `key` is visible in this scope.
    pub fn has_version(&self, key: &ComponentVersion) -> SyncResult<bool> {
        Ok(self.graph.contains(key)?)
    }

    /// The manifest of a visible version.
    pub fn manifest(&self, key: &ComponentVersion) -> SyncResult<Option<VersionManifest>> {
        if !self.graph.contains(key)? {
            return Ok(None);
        }
        Ok(self.store.get_manifest(key)?)
    }

    pub fn blob(&self, id: &ObjectId) -> SyncResult<Option<Blob>> {
        Ok(self.store.get_blob(id)?)
    }

    pub fn latest_version(&self, id: &ComponentId) -> SyncResult<Option<Version>> {
        Ok(self.graph.latest_version(id)?)
    }

    pub fn versions(&self, id: &ComponentId) -> SyncResult<Vec<Version>> {
        Ok(self.graph.all_versions(id)?)
    }

    pub fn list_components(&self) -> SyncResult<Vec<ComponentSummary>> {
        let mut summaries = Vec::new();
        for id in self.graph.components()? {
            let versions = self.graph.all_versions(&id)?;
            if let Some(latest) = versions.last().cloned() {
                summaries.push(ComponentSummary {
                    id,
                    latest,
                    versions,
                });
            }
        }
        Ok(summaries)
    }

    /// Commit `batch` atomically.
    ///
    /// Nothing is written unless every manifest is well formed, every blob
    /// and dependency it references is in the batch or already in this
    /// scope, and the version graph accepts every entry. Blobs are written
    /// first, then manifests, then the graph, so a crash can leave orphan
    /// objects but never a visible version with missing parts.
    pub fn apply_batch(&self, batch: &WriteBatch) -> SyncResult<Vec<AppendOutcome>> {
        let _guard = self.commit_lock.lock().expect("lock poisoned");

        for manifest in batch.manifests() {
            manifest.validate()?;
            for dependency in &manifest.dependencies {
                if !batch.contains_manifest(dependency) && !self.graph.contains(dependency)? {
                    return Err(SyncError::IncompleteBatch {
                        component: manifest.key(),
                        missing: format!("dependency {dependency}"),
                    });
                }
            }
        }
        if let Some((component, blob)) = batch.missing_blobs(self.store.as_ref())?.into_iter().next()
        {
            return Err(SyncError::IncompleteBatch {
                component,
                missing: format!("blob {}", blob.short_hex()),
            });
        }

        let manifests: Vec<VersionManifest> = batch.manifests().cloned().collect();
        self.graph.check_all(&manifests)?;

        for blob in batch.blobs() {
            self.store.put_blob(blob)?;
        }
        for manifest in &manifests {
            self.store.put_manifest(manifest)?;
            debug!(scope = self.label(), component = %manifest.key(), "manifest stored");
        }
        let outcomes = self.graph.append_all(&manifests)?;

        info!(
            scope = self.label(),
            blobs = batch.blob_count(),
            manifests = batch.manifest_count(),
            "batch committed"
        );
        Ok(outcomes)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.label())
            .field("graph", &self.graph)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use cvx_graph::GraphError;
    use cvx_store::FsObjectStore;

    use super::*;

    fn scope_name(name: &str) -> ScopeName {
        ScopeName::new(name).unwrap()
    }

    fn key(s: &str) -> ComponentVersion {
        s.parse().unwrap()
    }

    /// A batch holding one manifest for `component` with one file.
    fn single(component: &str, content: &[u8]) -> WriteBatch {
        let key = key(component);
        let mut batch = WriteBatch::new();
        let blob = batch.add_blob(Blob::new(content.to_vec()));
        batch.add_manifest(VersionManifest::new(key.id, key.version).with_file("index.js", blob));
        batch
    }

    #[test]
    fn apply_batch_makes_version_visible() {
        let scope = Scope::in_memory(scope_name("remote"));
        scope.apply_batch(&single("remote/bar/foo@0.0.1", b"a")).unwrap();

        let k = key("remote/bar/foo@0.0.1");
        assert!(scope.has_version(&k).unwrap());
        let manifest = scope.manifest(&k).unwrap().unwrap();
        let blob = scope.blob(&manifest.files["index.js"]).unwrap().unwrap();
        assert_eq!(blob.data, b"a");
    }

    #[test]
    fn batch_with_missing_blob_writes_nothing() {
        let scope = Scope::in_memory(scope_name("remote"));
        let k = key("remote/bar/foo@0.0.1");
        let mut batch = WriteBatch::new();
        batch.add_blob(Blob::new(b"unrelated".to_vec()));
        batch.add_manifest(
            VersionManifest::new(k.id.clone(), k.version.clone())
                .with_file("index.js", Blob::new(b"absent".to_vec()).id()),
        );

        let err = scope.apply_batch(&batch).unwrap_err();
        assert!(matches!(err, SyncError::IncompleteBatch { .. }));
        assert!(!scope.has_version(&k).unwrap());
        assert_eq!(scope.store().blob_count().unwrap(), 0);
    }

    #[test]
    fn batch_with_missing_dependency_is_rejected() {
        let scope = Scope::in_memory(scope_name("remote"));
        let k = key("remote/utils/is-string@0.0.1");
        let mut batch = WriteBatch::new();
        batch.add_manifest(
            VersionManifest::new(k.id, k.version)
                .with_dependency(key("remote/utils/is-type@0.0.1")),
        );
        assert!(matches!(
            scope.apply_batch(&batch),
            Err(SyncError::IncompleteBatch { .. })
        ));
    }

    #[test]
    fn conflicting_content_is_rejected_without_writes() {
        let scope = Scope::in_memory(scope_name("remote"));
        scope.apply_batch(&single("remote/bar/foo@0.0.1", b"a")).unwrap();

        let mut batch = single("remote/bar/foo@0.0.1", b"b");
        batch.extend(single("remote/bar/other@0.0.1", b"c"));
        let err = scope.apply_batch(&batch).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Graph(GraphError::VersionConflict { .. })
        ));
        assert!(!scope.has_version(&key("remote/bar/other@0.0.1")).unwrap());
        assert_eq!(scope.store().blob_count().unwrap(), 1);
    }

    #[test]
    fn reapplying_identical_batch_is_idempotent() {
        let scope = Scope::in_memory(scope_name("remote"));
        let batch = single("remote/bar/foo@0.0.1", b"a");
        scope.apply_batch(&batch).unwrap();
        let outcomes = scope.apply_batch(&batch).unwrap();
        assert_eq!(outcomes, vec![AppendOutcome::AlreadyPresent]);
    }

    #[test]
    fn list_components_summarizes_versions() {
        let scope = Scope::in_memory(scope_name("remote"));
        scope.apply_batch(&single("remote/bar/foo@0.0.1", b"a")).unwrap();
        scope.apply_batch(&single("remote/bar/foo@0.0.2", b"b")).unwrap();
        scope.apply_batch(&single("remote/utils/is-type@0.0.1", b"c")).unwrap();

        let summaries = scope.list_components().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id.to_string(), "remote/bar/foo");
        assert_eq!(summaries[0].latest.to_string(), "0.0.2");
        assert_eq!(summaries[0].versions.len(), 2);
    }

    #[test]
    fn filesystem_scope_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Arc::new(FsObjectStore::open(dir.path()).unwrap());
            let scope = Scope::open(scope_name("remote"), store).unwrap();
            scope.apply_batch(&single("remote/bar/foo@0.0.1", b"a")).unwrap();
        }
        let store = Arc::new(FsObjectStore::open(dir.path()).unwrap());
        let scope = Scope::open(scope_name("remote"), store).unwrap();
        assert_eq!(
            scope.latest_version(&"remote/bar/foo".parse().unwrap()).unwrap(),
            Some("0.0.1".parse().unwrap())
        );
        assert!(matches!(
            scope.apply_batch(&single("remote/bar/foo@0.0.1", b"b")),
            Err(SyncError::Graph(GraphError::VersionConflict { .. }))
        ));
    }

    #[test]
    fn local_scope_is_labelled_local() {
        let scope = Scope::local();
        assert!(scope.name().is_none());
        assert_eq!(scope.label(), "local");
    }
}
