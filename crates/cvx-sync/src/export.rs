use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use cvx_store::{Blob, VersionManifest, WriteBatch};
use cvx_types::{ComponentId, ComponentVersion, ScopeName};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::error::{SyncError, SyncResult, TransportError};
use crate::locator::SourceLocator;
use crate::resolver::ClosureResolver;
use crate::scope::Scope;
use crate::transport::ScopeConnector;

/// Lifecycle of an [`ExportTransaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportState {
    Collecting,
    Resolving,
    Fetching,
    Validating,
    Committing,
    Done,
    Aborted,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// What to export and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRequest {
    pub target: ScopeName,
    pub components: BTreeSet<ComponentVersion>,
    /// Scope bindings persisted by earlier exports (unbound id -> bound id).
    pub bindings: BTreeMap<ComponentId, ComponentId>,
}

impl ExportRequest {
    pub fn new(target: ScopeName, components: impl IntoIterator<Item = ComponentVersion>) -> Self {
        Self {
            target,
            components: components.into_iter().collect(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn with_bindings(mut self, bindings: BTreeMap<ComponentId, ComponentId>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Summary of a committed export.
#[derive(Clone, Debug)]
pub struct ExportReport {
    pub scope: ScopeName,
    /// The requested versions, as bound in the target.
    pub exported: Vec<ComponentVersion>,
    /// Dependencies that were missing from the target and are now present.
    pub fetched: Vec<ComponentVersion>,
    /// Dependencies the target already held.
    pub present: Vec<ComponentVersion>,
    /// Components bound to the target by this export (unbound id -> bound id).
    pub bindings: BTreeMap<ComponentId, ComponentId>,
    /// Scopes that served at least one request.
    pub peers: Vec<ScopeName>,
    /// Exactly what was committed to the target.
    pub batch: WriteBatch,
}

/// Result of a successful export transaction.
#[derive(Clone, Debug)]
pub enum ExportOutcome {
    NothingToExport,
    Exported(ExportReport),
}

impl ExportOutcome {
    pub fn report(&self) -> Option<&ExportReport> {
        match self {
            Self::NothingToExport => None,
            Self::Exported(report) => Some(report),
        }
    }

    /// Number of requested components now present in the target.
    pub fn exported_count(&self) -> usize {
        self.report().map_or(0, |r| r.exported.len())
    }
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToExport => f.write_str("nothing to export"),
            Self::Exported(report) => write!(
                f,
                "exported {} components to scope {}",
                report.exported.len(),
                report.scope
            ),
        }
    }
}

/// One all-or-nothing export of a set of versions into a target scope.
///
/// Runs `Collecting -> Resolving -> Fetching -> Validating -> Committing ->
/// Done`. Any failure moves to `Aborted`; the target receives its single
/// batch only in `Committing`, so an aborted transaction leaves it unchanged
/// and retrying with the same request is safe.
pub struct ExportTransaction<'a> {
    id: Uuid,
    state: ExportState,
    request: ExportRequest,
    local: &'a Scope,
    connector: &'a dyn ScopeConnector,
    config: &'a ExportConfig,
    peers: Vec<ScopeName>,
}

impl<'a> ExportTransaction<'a> {
    pub fn new(
        request: ExportRequest,
        local: &'a Scope,
        connector: &'a dyn ScopeConnector,
        config: &'a ExportConfig,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            state: ExportState::Collecting,
            request,
            local,
            connector,
            config,
            peers: Vec::new(),
        }
    }

    /// Scopes consulted earlier in the session, used as fallback sources.
    pub fn with_peers(mut self, peers: impl IntoIterator<Item = ScopeName>) -> Self {
        self.peers.extend(peers);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn request(&self) -> &ExportRequest {
        &self.request
    }

    pub async fn run(&mut self) -> SyncResult<ExportOutcome> {
        let span = info_span!("export", txn = %self.id, scope = %self.request.target);
        async {
            match self.execute().await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    warn!(state = ?self.state, error = %e, "export aborted");
                    self.transition(ExportState::Aborted);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn transition(&mut self, next: ExportState) {
        debug!(from = ?self.state, to = ?next, "export state");
        self.state = next;
    }

    async fn execute(&mut self) -> SyncResult<ExportOutcome> {
        self.config.validate()?;
        if self.request.is_empty() {
            info!("nothing to export");
            self.transition(ExportState::Done);
            return Ok(ExportOutcome::NothingToExport);
        }

        let request = self.request.clone();
        let (local, connector, config) = (self.local, self.connector, self.config);
        let target_name = request.target.clone();
        let locator = SourceLocator::new(local, connector, config)
            .excluding(target_name.clone())
            .with_peers(self.peers.iter().cloned());
        let target = locator.connect(&target_name)?;

        self.transition(ExportState::Resolving);
        let resolver = ClosureResolver::new(
            target.as_ref(),
            &locator,
            &request.bindings,
            config.max_concurrent_fetches,
        );
        let closure = resolver.resolve(request.components.iter().cloned()).await?;

        self.transition(ExportState::Fetching);
        let locator = &locator;
        let fetched: BTreeMap<ComponentVersion, Vec<Blob>> = stream::iter(closure.missing.iter())
            .map(|(key, located)| async move {
                Ok::<_, SyncError>((key.clone(), locator.fetch_blobs(located).await?))
            })
            .buffer_unordered(config.max_concurrent_fetches)
            .try_collect()
            .await?;

        self.transition(ExportState::Validating);
        let roots: BTreeSet<ComponentVersion> = request
            .components
            .iter()
            .map(|key| resolver.effective(key))
            .collect();
        if let Some(root) = roots.iter().find(|root| closure.present.contains(*root)) {
            return Err(SyncError::AlreadyExported {
                component: root.clone(),
                scope: target_name,
            });
        }

        let mut batch = WriteBatch::new();
        let mut bindings = BTreeMap::new();
        for (key, located) in &closure.missing {
            let manifest = bind_manifest(&located.manifest, &resolver, &target_name);
            if manifest.key() != *key {
                return Err(SyncError::DependencyUnavailable {
                    component: key.clone(),
                    last_source: located.source.to_string(),
                    reason: format!("source returned {}", manifest.key()),
                });
            }
            manifest.validate()?;
            if !located.manifest.id.is_bound() {
                bindings.insert(located.manifest.id.clone(), manifest.id.clone());
            }
            for blob in fetched.get(key).into_iter().flatten() {
                batch.add_blob(blob.clone());
            }
            if let Some(id) = manifest.blob_ids().into_iter().find(|id| !batch.contains_blob(id)) {
                return Err(SyncError::IncompleteBatch {
                    component: key.clone(),
                    missing: format!("blob {}", id.short_hex()),
                });
            }
            batch.add_manifest(manifest);
        }

        self.transition(ExportState::Committing);
        match target.push_batch(&batch).await {
            Ok(()) => {}
            Err(TransportError::Rejected { source, .. }) => return Err(*source),
            Err(e) => return Err(e.into()),
        }

        let report = ExportReport {
            exported: roots.iter().cloned().collect(),
            fetched: closure
                .missing
                .keys()
                .filter(|k| !roots.contains(*k))
                .cloned()
                .collect(),
            present: closure.present.iter().cloned().collect(),
            bindings,
            peers: locator.peers(),
            batch,
            scope: target_name,
        };
        self.peers = report.peers.clone();
        self.transition(ExportState::Done);
        info!(
            exported = report.exported.len(),
            fetched = report.fetched.len(),
            present = report.present.len(),
            "export committed"
        );
        Ok(ExportOutcome::Exported(report))
    }
}

/// The form `manifest` takes in the target: every component identity (its
/// own and its pins) replaced by its effective identity, and an unset origin
/// set to the target. Already exported manifests come out unchanged.
fn bind_manifest(
    manifest: &VersionManifest,
    resolver: &ClosureResolver<'_>,
    target: &ScopeName,
) -> VersionManifest {
    let mut bound = manifest.clone();
    bound.id = resolver.effective_id(&manifest.id);
    bound.dependencies = manifest
        .dependencies
        .iter()
        .map(|dependency| resolver.effective(dependency))
        .collect();
    if bound.origin.is_none() {
        bound.origin = Some(target.clone());
    }
    bound
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::network::InMemoryNetwork;
    use crate::workspace::{CommitOptions, ExportSelection, Workspace};

    fn name(s: &str) -> ScopeName {
        ScopeName::new(s).unwrap()
    }

    fn key(s: &str) -> ComponentVersion {
        s.parse().unwrap()
    }

    async fn publish(
        ws: &mut Workspace,
        component: &str,
        deps: &[&str],
        scope: &str,
    ) -> ComponentVersion {
        let id: ComponentId = component.parse().unwrap();
        let deps: Vec<ComponentVersion> = deps.iter().map(|d| key(d)).collect();
        ws.commit(
            &id,
            [("index.js", component.as_bytes().to_vec())],
            &deps,
            CommitOptions::default(),
        )
        .unwrap();
        let outcome = ws
            .export(ExportSelection::Components(vec![id]), &name(scope))
            .await
            .unwrap();
        outcome.report().unwrap().exported[0].clone()
    }

    #[tokio::test]
    async fn empty_request_is_nothing_to_export() {
        let network = InMemoryNetwork::new();
        let local = Scope::local();
        let config = ExportConfig::default();
        let request = ExportRequest::new(name("never-registered"), Vec::new());
        let mut txn = ExportTransaction::new(request, &local, &network, &config);

        let outcome = txn.run().await.unwrap();
        assert!(matches!(outcome, ExportOutcome::NothingToExport));
        assert_eq!(txn.state(), ExportState::Done);
        assert_eq!(txn.id().get_version_num(), 7);
    }

    #[tokio::test]
    async fn chain_across_three_scopes_lands_in_fourth() {
        let network = InMemoryNetwork::new();
        for scope in ["s1", "s2", "s3", "s4"] {
            network.add_scope(scope).unwrap();
        }
        let mut ws = Workspace::new(Arc::new(network.clone()));
        publish(&mut ws, "lib/c", &[], "s3").await;
        publish(&mut ws, "lib/b", &["lib/c@0.0.1"], "s2").await;
        let a = publish(&mut ws, "lib/a", &["lib/b@0.0.1"], "s1").await;
        assert_eq!(a, key("s1/lib/a@0.0.1"));

        // a fresh environment with nothing cached
        let local = Scope::local();
        let config = ExportConfig::default();
        let request = ExportRequest::new(name("s4"), [a]);
        let mut txn = ExportTransaction::new(request, &local, &network, &config);
        let outcome = txn.run().await.unwrap();
        assert_eq!(txn.state(), ExportState::Done);

        let report = outcome.report().unwrap();
        assert_eq!(report.exported, vec![key("s1/lib/a@0.0.1")]);
        assert_eq!(
            report.fetched,
            vec![key("s2/lib/b@0.0.1"), key("s3/lib/c@0.0.1")]
        );
        assert_eq!(report.peers, vec![name("s1"), name("s2"), name("s3")]);
        assert!(report.bindings.is_empty());

        let s4 = network.scope(&name("s4")).unwrap();
        for k in ["s1/lib/a@0.0.1", "s2/lib/b@0.0.1", "s3/lib/c@0.0.1"] {
            assert!(s4.has_version(&key(k)).unwrap(), "{k} missing");
        }
        // fetched manifests are committed byte-identical
        let original = network
            .scope(&name("s3"))
            .unwrap()
            .manifest(&key("s3/lib/c@0.0.1"))
            .unwrap()
            .unwrap();
        let copy = s4.manifest(&key("s3/lib/c@0.0.1")).unwrap().unwrap();
        assert_eq!(
            original.to_canonical_bytes().unwrap(),
            copy.to_canonical_bytes().unwrap()
        );
    }

    #[tokio::test]
    async fn older_pin_backfills_history_owned_by_target() {
        let network = InMemoryNetwork::new();
        network.add_scope("t").unwrap();
        let mut ws = Workspace::new(Arc::new(network.clone()));
        let d: ComponentId = "utils/d".parse().unwrap();
        for content in ["d1", "d2"] {
            ws.commit(&d, [("d.js", content)], &[], CommitOptions::default())
                .unwrap();
        }
        ws.commit(
            &"utils/a".parse().unwrap(),
            [("a.js", "a")],
            &[key("utils/d@0.0.1")],
            CommitOptions::default(),
        )
        .unwrap();

        let config = ExportConfig::default();
        let newer = ExportRequest::new(name("t"), [key("utils/d@0.0.2")]);
        let mut txn = ExportTransaction::new(newer, ws.local(), &network, &config);
        let outcome = txn.run().await.unwrap();
        let bindings = outcome.report().unwrap().bindings.clone();

        let dependent =
            ExportRequest::new(name("t"), [key("utils/a@0.0.1")]).with_bindings(bindings);
        let mut txn = ExportTransaction::new(dependent, ws.local(), &network, &config);
        let report = txn.run().await.unwrap().report().cloned().unwrap();
        assert_eq!(report.exported, vec![key("t/utils/a@0.0.1")]);
        assert_eq!(report.fetched, vec![key("t/utils/d@0.0.1")]);

        let t = network.scope(&name("t")).unwrap();
        let versions: Vec<String> = t
            .versions(&"t/utils/d".parse().unwrap())
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(versions, vec!["0.0.1", "0.0.2"]);
        assert_eq!(
            t.latest_version(&"t/utils/d".parse().unwrap()).unwrap(),
            Some("0.0.2".parse().unwrap())
        );
        let a = t.manifest(&key("t/utils/a@0.0.1")).unwrap().unwrap();
        assert_eq!(
            a.dependencies.into_iter().collect::<Vec<_>>(),
            vec![key("t/utils/d@0.0.1")]
        );
    }

    #[tokio::test]
    async fn unreachable_origin_aborts_and_retry_succeeds() {
        let network = InMemoryNetwork::new();
        network.add_scope("remote1").unwrap();
        network.add_scope("remote2").unwrap();
        let mut ws = Workspace::new(Arc::new(network.clone()));
        let root = publish(&mut ws, "utils/is-type", &[], "remote1").await;
        network.set_offline(&name("remote1"), true);

        let local = Scope::local();
        let config = ExportConfig::default();
        let request = ExportRequest::new(name("remote2"), [root.clone()]);
        let mut txn = ExportTransaction::new(request.clone(), &local, &network, &config);
        let err = txn.run().await.unwrap_err();
        match err {
            SyncError::DependencyUnavailable {
                component,
                last_source,
                reason,
            } => {
                assert_eq!(component, root);
                assert_eq!(last_source, "remote1");
                assert!(reason.contains("offline"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(txn.state(), ExportState::Aborted);
        let remote2 = network.scope(&name("remote2")).unwrap();
        assert_eq!(remote2.store().blob_count().unwrap(), 0);
        assert!(remote2.list_components().unwrap().is_empty());

        network.set_offline(&name("remote1"), false);
        let mut retry = ExportTransaction::new(request, &local, &network, &config);
        assert_eq!(retry.run().await.unwrap().exported_count(), 1);
        assert!(remote2.has_version(&root).unwrap());
    }

    #[tokio::test]
    async fn slow_target_times_out() {
        let network = InMemoryNetwork::new();
        network.add_scope("remote").unwrap();
        network.set_latency(&name("remote"), Duration::from_millis(300));

        let local = Scope::local();
        let config = ExportConfig::default().with_fetch_timeout(Duration::from_millis(20));
        let request = ExportRequest::new(name("remote"), [key("remote/bar/foo@0.0.1")]);
        let mut txn = ExportTransaction::new(request, &local, &network, &config);
        let err = txn.run().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Transport(TransportError::Timeout { .. })
        ));
        assert_eq!(txn.state(), ExportState::Aborted);
    }

    #[tokio::test]
    async fn unknown_target_is_a_transport_error() {
        let network = InMemoryNetwork::new();
        let local = Scope::local();
        let config = ExportConfig::default();
        let request = ExportRequest::new(name("nowhere"), [key("bar/foo@0.0.1")]);
        let mut txn = ExportTransaction::new(request, &local, &network, &config);
        assert!(matches!(
            txn.run().await,
            Err(SyncError::Transport(TransportError::Unreachable { .. }))
        ));
    }

    #[test]
    fn outcome_display() {
        let report = ExportReport {
            scope: name("remote"),
            exported: vec![key("remote/bar/foo@0.0.1"), key("remote/bar/baz@0.0.1")],
            fetched: Vec::new(),
            present: Vec::new(),
            bindings: BTreeMap::new(),
            peers: Vec::new(),
            batch: WriteBatch::new(),
        };
        assert_eq!(
            ExportOutcome::Exported(report).to_string(),
            "exported 2 components to scope remote"
        );
        assert_eq!(ExportOutcome::NothingToExport.to_string(), "nothing to export");
    }

    #[test]
    fn terminal_states() {
        assert!(ExportState::Done.is_terminal());
        assert!(ExportState::Aborted.is_terminal());
        assert!(!ExportState::Fetching.is_terminal());
    }
}
