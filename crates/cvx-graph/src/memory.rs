use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use cvx_store::{ObjectStore, VersionManifest};
use cvx_types::{ComponentId, ComponentVersion, ObjectId, ScopeName, Version};
use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::traits::{AppendOutcome, VersionGraph};

type History = BTreeMap<Version, ObjectId>;

/// In-memory version graph.
///
/// One write lock serializes every append, which is what makes racing
/// appends of the same `(ComponentId, Version)` deterministic.
pub struct InMemoryVersionGraph {
    owner: Option<ScopeName>,
    inner: RwLock<HashMap<ComponentId, History>>,
}

impl InMemoryVersionGraph {
    pub fn new(owner: Option<ScopeName>) -> Self {
        Self {
            owner,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the graph from every manifest held in `store`.
    ///
    /// The store is authoritative: entries are indexed as found, without
    /// re-applying the append rules.
    pub fn from_store(owner: Option<ScopeName>, store: &dyn ObjectStore) -> GraphResult<Self> {
        let graph = Self::new(owner);
        {
            let mut state = graph.inner.write().expect("lock poisoned");
            for key in store.list_manifests()? {
                let manifest = store.require_manifest(&key)?;
                state
                    .entry(key.id)
                    .or_default()
                    .insert(key.version, manifest.content_id()?);
            }
        }
        debug!(owner = ?graph.owner, components = graph.len(), "version graph rebuilt");
        Ok(graph)
    }

    /// Number of components with at least one version.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decide the outcome of appending `key` with `content_id` on top of
    /// `history`. A version absent from the history is accepted wherever it
    /// falls, so older versions can be backfilled.
    fn check(
        history: Option<&History>,
        key: &ComponentVersion,
        content_id: ObjectId,
    ) -> GraphResult<AppendOutcome> {
        let Some(history) = history else {
            return Ok(AppendOutcome::Appended);
        };
        if let Some(existing) = history.get(&key.version) {
            return if *existing == content_id {
                Ok(AppendOutcome::AlreadyPresent)
            } else {
                Err(GraphError::VersionConflict {
                    component: key.clone(),
                })
            };
        }
        Ok(AppendOutcome::Appended)
    }

    /// Run every check for `manifests` in ascending key order against a
    /// scratch copy of the touched histories. Returns the outcomes in that
    /// order together with the scratch histories.
    #[allow(clippy::type_complexity)]
    fn plan(
        &self,
        state: &HashMap<ComponentId, History>,
        manifests: &[VersionManifest],
    ) -> GraphResult<(Vec<(ComponentVersion, AppendOutcome)>, HashMap<ComponentId, History>)>
    {
        let mut entries = manifests
            .iter()
            .map(|m| Ok((m.key(), m.content_id()?)))
            .collect::<GraphResult<Vec<_>>>()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut scratch: HashMap<ComponentId, History> = HashMap::new();
        let mut outcomes = Vec::with_capacity(entries.len());
        for (key, content_id) in entries {
            let history = scratch
                .entry(key.id.clone())
                .or_insert_with(|| state.get(&key.id).cloned().unwrap_or_default());
            let outcome = Self::check(Some(&*history), &key, content_id)?;
            if outcome == AppendOutcome::Appended {
                history.insert(key.version.clone(), content_id);
            }
            outcomes.push((key, outcome));
        }
        Ok((outcomes, scratch))
    }
}

impl Default for InMemoryVersionGraph {
    fn default() -> Self {
        Self::new(None)
    }
}

impl VersionGraph for InMemoryVersionGraph {
    fn owner(&self) -> Option<&ScopeName> {
        self.owner.as_ref()
    }

    fn latest_version(&self, id: &ComponentId) -> GraphResult<Option<Version>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state
            .get(id)
            .and_then(|h| h.last_key_value())
            .map(|(v, _)| v.clone()))
    }

    fn all_versions(&self, id: &ComponentId) -> GraphResult<Vec<Version>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state
            .get(id)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn manifest_id(&self, key: &ComponentVersion) -> GraphResult<Option<ObjectId>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state.get(&key.id).and_then(|h| h.get(&key.version)).copied())
    }

    fn append(&self, manifest: &VersionManifest) -> GraphResult<AppendOutcome> {
        let key = manifest.key();
        let content_id = manifest.content_id()?;
        let mut state = self.inner.write().expect("lock poisoned");
        let outcome = Self::check(state.get(&key.id), &key, content_id)?;
        if outcome == AppendOutcome::Appended {
            state
                .entry(key.id.clone())
                .or_default()
                .insert(key.version.clone(), content_id);
            debug!(component = %key, "version appended");
        }
        Ok(outcome)
    }

    fn append_all(&self, manifests: &[VersionManifest]) -> GraphResult<Vec<AppendOutcome>> {
        let mut state = self.inner.write().expect("lock poisoned");
        let (outcomes, scratch) = self.plan(&state, manifests)?;
        state.extend(scratch);
        let appended = outcomes
            .iter()
            .filter(|(_, o)| *o == AppendOutcome::Appended)
            .count();
        debug!(appended, total = outcomes.len(), "versions appended");
        Ok(outcomes.into_iter().map(|(_, o)| o).collect())
    }

    fn check_all(&self, manifests: &[VersionManifest]) -> GraphResult<()> {
        let state = self.inner.read().expect("lock poisoned");
        self.plan(&state, manifests).map(|_| ())
    }

    fn components(&self) -> GraphResult<Vec<ComponentId>> {
        let state = self.inner.read().expect("lock poisoned");
        let mut ids: Vec<ComponentId> = state.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for InMemoryVersionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVersionGraph")
            .field("owner", &self.owner)
            .field("components", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use cvx_store::{Blob, InMemoryObjectStore};

    use super::*;

    fn scope(name: &str) -> ScopeName {
        ScopeName::new(name).unwrap()
    }

    fn manifest(key: &str) -> VersionManifest {
        let key: ComponentVersion = key.parse().unwrap();
        VersionManifest::new(key.id, key.version)
    }

    fn owned_graph() -> InMemoryVersionGraph {
        InMemoryVersionGraph::new(Some(scope("remote")))
    }

    // -----------------------------------------------------------------------
    // Single appends
    // -----------------------------------------------------------------------

    #[test]
    fn append_and_query() {
        let graph = owned_graph();
        let m = manifest("remote/bar/foo@0.0.1");
        assert_eq!(graph.append(&m).unwrap(), AppendOutcome::Appended);
        assert!(graph.contains(&m.key()).unwrap());
        assert_eq!(graph.manifest_id(&m.key()).unwrap(), Some(m.content_id().unwrap()));
        assert_eq!(
            graph.latest_version(&m.id).unwrap(),
            Some("0.0.1".parse().unwrap())
        );
    }

    #[test]
    fn unknown_component_has_no_versions() {
        let graph = owned_graph();
        let id: ComponentId = "remote/bar/foo".parse().unwrap();
        assert_eq!(graph.latest_version(&id).unwrap(), None);
        assert!(graph.all_versions(&id).unwrap().is_empty());
    }

    #[test]
    fn identical_append_is_idempotent() {
        let graph = owned_graph();
        let m = manifest("remote/bar/foo@0.0.1");
        graph.append(&m).unwrap();
        assert_eq!(graph.append(&m).unwrap(), AppendOutcome::AlreadyPresent);
        assert_eq!(graph.all_versions(&m.id).unwrap().len(), 1);
    }

    #[test]
    fn different_content_same_version_conflicts() {
        let graph = owned_graph();
        graph.append(&manifest("remote/bar/foo@0.0.1")).unwrap();
        let other =
            manifest("remote/bar/foo@0.0.1").with_file("foo.js", Blob::new(b"x".to_vec()).id());
        assert!(matches!(
            graph.append(&other),
            Err(GraphError::VersionConflict { .. })
        ));
    }

    #[test]
    fn owned_history_accepts_older_missing_version() {
        let graph = owned_graph();
        graph.append(&manifest("remote/utils/d@0.0.2")).unwrap();
        assert_eq!(
            graph.append(&manifest("remote/utils/d@0.0.1")).unwrap(),
            AppendOutcome::Appended
        );
        let versions: Vec<String> = graph
            .all_versions(&"remote/utils/d".parse().unwrap())
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(versions, vec!["0.0.1", "0.0.2"]);
        assert_eq!(
            graph.latest_version(&"remote/utils/d".parse().unwrap()).unwrap(),
            Some("0.0.2".parse().unwrap())
        );
    }

    #[test]
    fn successor_must_exceed_latest() {
        let graph = owned_graph();
        graph.append(&manifest("remote/bar/foo@0.0.3")).unwrap();
        graph
            .check_successor(&"remote/bar/foo@0.0.4".parse().unwrap())
            .unwrap();
        graph
            .check_successor(&"remote/bar/new@0.0.1".parse().unwrap())
            .unwrap();
        assert!(graph
            .check_successor(&"remote/bar/foo@0.0.3".parse().unwrap())
            .is_err());
        let err = graph
            .check_successor(&"remote/bar/foo@0.0.2".parse().unwrap())
            .unwrap_err();
        match err {
            GraphError::NonMonotonicVersion { component, latest } => {
                assert_eq!(component.to_string(), "remote/bar/foo@0.0.2");
                assert_eq!(latest.to_string(), "0.0.3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn foreign_component_accepts_older_version() {
        let graph = owned_graph();
        graph.append(&manifest("remote1/utils/is-type@0.0.2")).unwrap();
        assert_eq!(
            graph.append(&manifest("remote1/utils/is-type@0.0.1")).unwrap(),
            AppendOutcome::Appended
        );
        let versions: Vec<String> = graph
            .all_versions(&"remote1/utils/is-type".parse().unwrap())
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(versions, vec!["0.0.1", "0.0.2"]);
    }

    // -----------------------------------------------------------------------
    // Batched appends
    // -----------------------------------------------------------------------

    #[test]
    fn append_all_applies_in_ascending_order() {
        let graph = owned_graph();
        let outcomes = graph
            .append_all(&[
                manifest("remote/bar/foo@0.0.3"),
                manifest("remote/bar/foo@0.0.1"),
                manifest("remote/bar/foo@0.0.2"),
            ])
            .unwrap();
        assert_eq!(outcomes, vec![AppendOutcome::Appended; 3]);
        assert_eq!(
            graph.latest_version(&"remote/bar/foo".parse().unwrap()).unwrap(),
            Some("0.0.3".parse().unwrap())
        );
    }

    #[test]
    fn append_all_is_all_or_nothing() {
        let graph = owned_graph();
        graph.append(&manifest("remote/bar/foo@0.0.5")).unwrap();
        let changed =
            manifest("remote/bar/foo@0.0.5").with_file("foo.js", Blob::new(b"y".to_vec()).id());
        let result = graph.append_all(&[manifest("remote/bar/other@0.0.1"), changed]);
        assert!(matches!(result, Err(GraphError::VersionConflict { .. })));
        assert!(!graph
            .contains(&"remote/bar/other@0.0.1".parse().unwrap())
            .unwrap());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn append_all_reports_already_present_entries() {
        let graph = owned_graph();
        let existing = manifest("remote/bar/foo@0.0.1");
        graph.append(&existing).unwrap();
        let outcomes = graph
            .append_all(&[existing, manifest("remote/bar/foo@0.0.2")])
            .unwrap();
        assert_eq!(
            outcomes,
            vec![AppendOutcome::AlreadyPresent, AppendOutcome::Appended]
        );
    }

    #[test]
    fn check_all_leaves_graph_untouched() {
        let graph = owned_graph();
        graph.check_all(&[manifest("remote/bar/foo@0.0.1")]).unwrap();
        assert!(graph.is_empty());
    }

    // -----------------------------------------------------------------------
    // Rebuild / concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn from_store_indexes_every_manifest() {
        let store = InMemoryObjectStore::new();
        store.put_manifest(&manifest("remote/bar/foo@0.0.1")).unwrap();
        store.put_manifest(&manifest("remote/bar/foo@0.0.2")).unwrap();
        store.put_manifest(&manifest("remote1/utils/is-type@0.0.1")).unwrap();

        let graph = InMemoryVersionGraph::from_store(Some(scope("remote")), &store).unwrap();
        assert_eq!(graph.components().unwrap().len(), 2);
        assert_eq!(
            graph.latest_version(&"remote/bar/foo".parse().unwrap()).unwrap(),
            Some("0.0.2".parse().unwrap())
        );
    }

    #[test]
    fn racing_appends_of_one_version_have_one_winner() {
        let graph = Arc::new(owned_graph());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let graph = Arc::clone(&graph);
                thread::spawn(move || {
                    let m = manifest("remote/bar/foo@0.0.1")
                        .with_file("foo.js", Blob::new(vec![i]).id());
                    graph.append(&m)
                })
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, GraphError::VersionConflict { .. })));
    }
}
