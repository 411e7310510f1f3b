use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use cvx_store::{Blob, VersionManifest, WriteBatch};
use cvx_types::{ComponentId, ComponentVersion, ScopeName, Version};
use tracing::{info, warn};

use crate::config::ExportConfig;
use crate::error::{SyncError, SyncResult};
use crate::export::{ExportOutcome, ExportReport, ExportRequest, ExportTransaction};
use crate::locator::SourceLocator;
use crate::scope::{ComponentSummary, Scope};
use crate::transport::ScopeConnector;

/// Options of [`Workspace::commit`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Commit even when nothing changed since the latest version.
    pub force: bool,
    /// Use this version instead of the next one.
    pub version: Option<Version>,
    pub main_file: Option<String>,
}

impl CommitOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_main_file(mut self, path: impl Into<String>) -> Self {
        self.main_file = Some(path.into());
        self
    }
}

/// Which components an export covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportSelection {
    /// Every staged version.
    All,
    /// The staged versions of these components, or their latest version
    /// when none is staged.
    Components(Vec<ComponentId>),
}

/// A developer's workspace as seen by the export engine.
///
/// Holds committed and imported versions in a private local scope, tracks
/// which versions are staged for export, and remembers the scope each
/// exported component was bound to. File tracking is not modelled: commits
/// take file contents directly.
pub struct Workspace {
    local: Scope,
    connector: Arc<dyn ScopeConnector>,
    config: ExportConfig,
    staged: BTreeSet<ComponentVersion>,
    bindings: BTreeMap<ComponentId, ComponentId>,
    peers: Vec<ScopeName>,
}

impl Workspace {
    pub fn new(connector: Arc<dyn ScopeConnector>) -> Self {
        Self {
            local: Scope::local(),
            connector,
            config: ExportConfig::default(),
            staged: BTreeSet::new(),
            bindings: BTreeMap::new(),
            peers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ExportConfig) -> SyncResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn local(&self) -> &Scope {
        &self.local
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Versions eligible for export, ascending.
    pub fn staged(&self) -> Vec<ComponentVersion> {
        self.staged.iter().cloned().collect()
    }

    /// The scope binding persisted for an unbound component.
    pub fn binding(&self, id: &ComponentId) -> Option<&ComponentId> {
        self.bindings.get(id)
    }

    /// `id` under its persisted binding, if any.
    pub fn resolve_id(&self, id: &ComponentId) -> ComponentId {
        self.bindings.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    pub fn latest_version(&self, id: &ComponentId) -> SyncResult<Option<Version>> {
        self.local.latest_version(&self.resolve_id(id))
    }

    pub fn list(&self) -> SyncResult<Vec<ComponentSummary>> {
        self.local.list_components()
    }

    /// Record a new version of `id` and stage it.
    ///
    /// Dependencies are pinned exactly and must already be in the workspace.
    /// Without `force`, content identical to the latest version is rejected.
    pub fn commit<P, B>(
        &mut self,
        id: &ComponentId,
        files: impl IntoIterator<Item = (P, B)>,
        dependencies: &[ComponentVersion],
        options: CommitOptions,
    ) -> SyncResult<ComponentVersion>
    where
        P: Into<String>,
        B: Into<Vec<u8>>,
    {
        let id = self.resolve_id(id);
        let latest = self.local.latest_version(&id)?;
        let version = match (options.version, &latest) {
            (Some(version), _) => version,
            (None, Some(latest)) => latest.next()?,
            (None, None) => Version::first(),
        };
        self.local.graph().check_successor(&id.at(version.clone()))?;

        let mut batch = WriteBatch::new();
        let mut manifest = VersionManifest::new(id.clone(), version);
        for (path, bytes) in files {
            let blob = batch.add_blob(Blob::new(bytes));
            manifest = manifest.with_file(path, blob);
        }
        for dependency in dependencies {
            let pinned = self.resolve_id(&dependency.id).at(dependency.version.clone());
            if !self.local.has_version(&pinned)? {
                return Err(SyncError::ComponentNotFound(pinned.to_string()));
            }
            manifest = manifest.with_dependency(pinned);
        }
        if let Some(main) = options.main_file {
            manifest = manifest.with_main_file(main);
        }
        if let Some(scope) = id.scope() {
            manifest = manifest.with_origin(scope.clone());
        }

        if let (Some(latest), false) = (&latest, options.force) {
            if let Some(previous) = self.local.manifest(&id.at(latest.clone()))? {
                if previous.files == manifest.files
                    && previous.dependencies == manifest.dependencies
                    && previous.main_file == manifest.main_file
                {
                    return Err(SyncError::Unchanged {
                        component: id,
                        latest: latest.clone(),
                    });
                }
            }
        }

        let key = manifest.key();
        batch.add_manifest(manifest);
        self.local.apply_batch(&batch)?;
        self.staged.insert(key.clone());
        info!(component = %key, files = batch.blob_count(), "committed");
        Ok(key)
    }

    /// Bytes of `path` in a workspace version, exactly as committed.
    pub fn read_file(&self, key: &ComponentVersion, path: &str) -> SyncResult<Vec<u8>> {
        let key = self.resolve_id(&key.id).at(key.version.clone());
        let manifest = self
            .local
            .manifest(&key)?
            .ok_or_else(|| SyncError::ComponentNotFound(key.to_string()))?;
        let not_found = || SyncError::FileNotFound {
            component: key.clone(),
            path: path.to_string(),
        };
        let id = manifest.files.get(path).ok_or_else(not_found)?;
        let blob = self.local.blob(id)?.ok_or_else(not_found)?;
        Ok(blob.data)
    }

    /// Bring a version of a bound component (the latest when `version` is
    /// `None`) and its transitive dependencies into the workspace. Imported
    /// versions are not staged. Returns the versions that were new here.
    pub async fn import(
        &mut self,
        id: &ComponentId,
        version: Option<Version>,
    ) -> SyncResult<Vec<ComponentVersion>> {
        let id = self.resolve_id(id);
        let Some(scope) = id.scope().cloned() else {
            return Err(SyncError::ComponentNotFound(id.to_string()));
        };

        let (root, batch, imported, peers) = {
            let locator = SourceLocator::new(&self.local, self.connector.as_ref(), &self.config)
                .with_peers(self.peers.iter().cloned());
            let version = match version {
                Some(version) => version,
                None => {
                    let transport = locator.connect(&scope)?;
                    locator
                        .bounded(&scope, transport.list_versions(&id))
                        .await?
                        .into_iter()
                        .max()
                        .ok_or_else(|| SyncError::ComponentNotFound(id.to_string()))?
                }
            };
            let root = id.at(version);

            let mut pending = vec![root.clone()];
            let mut visited = HashSet::from([root.clone()]);
            let mut batch = WriteBatch::new();
            let mut imported = Vec::new();
            while let Some(key) = pending.pop() {
                if self.local.has_version(&key)? {
                    continue;
                }
                let located = locator.locate(&key, &[]).await?;
                for blob in locator.fetch_blobs(&located).await? {
                    batch.add_blob(blob);
                }
                for dependency in &located.manifest.dependencies {
                    if visited.insert(dependency.clone()) {
                        pending.push(dependency.clone());
                    }
                }
                batch.add_manifest(located.manifest);
                imported.push(key);
            }
            (root, batch, imported, locator.peers())
        };

        if !batch.is_empty() {
            self.local.apply_batch(&batch)?;
        }
        self.remember_peers(peers);
        let mut imported = imported;
        imported.sort();
        info!(component = %root, imported = imported.len(), "imported");
        Ok(imported)
    }

    /// Export `selection` to `target` in one transaction.
    ///
    /// On success the new scope bindings are persisted, the committed batch
    /// is cached locally and the exported versions leave the staged set.
    pub async fn export(
        &mut self,
        selection: ExportSelection,
        target: &ScopeName,
    ) -> SyncResult<ExportOutcome> {
        let roots = self.select(&selection)?;
        let request =
            ExportRequest::new(target.clone(), roots).with_bindings(self.bindings.clone());
        let outcome = {
            let mut txn = ExportTransaction::new(
                request,
                &self.local,
                self.connector.as_ref(),
                &self.config,
            )
            .with_peers(self.peers.iter().cloned());
            txn.run().await?
        };

        if let ExportOutcome::Exported(report) = &outcome {
            self.absorb(report);
        }
        Ok(outcome)
    }

    /// Persist what a committed export taught the workspace.
    fn absorb(&mut self, report: &ExportReport) {
        self.bindings
            .extend(report.bindings.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Err(e) = self.local.apply_batch(&report.batch) {
            warn!(scope = %report.scope, error = %e, "exported batch could not be cached locally");
        }

        let exported: BTreeSet<ComponentVersion> =
            report.batch.manifests().map(|m| m.key()).collect();
        let bindings = &self.bindings;
        self.staged.retain(|key| {
            let id = bindings.get(&key.id).cloned().unwrap_or_else(|| key.id.clone());
            !exported.contains(&id.at(key.version.clone()))
        });
        let peers: Vec<ScopeName> = report
            .peers
            .iter()
            .chain(std::iter::once(&report.scope))
            .cloned()
            .collect();
        self.remember_peers(peers);
    }

    fn select(&self, selection: &ExportSelection) -> SyncResult<BTreeSet<ComponentVersion>> {
        let ids = match selection {
            ExportSelection::All => return Ok(self.staged.clone()),
            ExportSelection::Components(ids) => ids,
        };
        let mut roots = BTreeSet::new();
        for id in ids {
            let resolved = self.resolve_id(id);
            let staged: Vec<ComponentVersion> = self
                .staged
                .iter()
                .filter(|key| key.id == *id || key.id == resolved)
                .cloned()
                .collect();
            if staged.is_empty() {
                let latest = self
                    .local
                    .latest_version(&resolved)?
                    .ok_or_else(|| SyncError::ComponentNotFound(id.to_string()))?;
                roots.insert(resolved.at(latest));
            } else {
                roots.extend(staged);
            }
        }
        Ok(roots)
    }

    fn remember_peers(&mut self, peers: impl IntoIterator<Item = ScopeName>) {
        for peer in peers {
            if !self.peers.contains(&peer) {
                self.peers.push(peer);
            }
        }
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("local", &self.local)
            .field("staged", &self.staged)
            .field("bindings", &self.bindings)
            .finish()
    }
}
