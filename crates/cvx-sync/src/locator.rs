use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use cvx_store::{Blob, VersionManifest};
use cvx_types::{ComponentVersion, ScopeName};
use tracing::{debug, warn};

use crate::config::ExportConfig;
use crate::error::{SyncError, SyncResult, TransportError, TransportResult};
use crate::scope::Scope;
use crate::transport::{ScopeConnector, ScopeTransport};

/// Where a located manifest (and therefore its blobs) came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// The workspace's own scope.
    Local,
    Remote(ScopeName),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(scope) => write!(f, "{scope}"),
        }
    }
}

/// A manifest found at some source.
#[derive(Clone, Debug)]
pub struct LocatedManifest {
    pub manifest: VersionManifest,
    pub source: Source,
}

/// Finds and fetches versions that a target scope lacks.
///
/// Candidates are tried in order: the local scope, the scope the version is
/// bound to, then (when enabled) every scope that already served a request
/// during this session. The excluded scope (an export's target) is never
/// consulted.
pub struct SourceLocator<'a> {
    local: &'a Scope,
    connector: &'a dyn ScopeConnector,
    config: &'a ExportConfig,
    exclude: Option<ScopeName>,
    peers: Mutex<Vec<ScopeName>>,
    connections: Mutex<HashMap<ScopeName, Arc<dyn ScopeTransport>>>,
}

impl<'a> SourceLocator<'a> {
    pub fn new(
        local: &'a Scope,
        connector: &'a dyn ScopeConnector,
        config: &'a ExportConfig,
    ) -> Self {
        Self {
            local,
            connector,
            config,
            exclude: None,
            peers: Mutex::new(Vec::new()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Never consult `scope`.
    pub fn excluding(mut self, scope: ScopeName) -> Self {
        self.exclude = Some(scope);
        self
    }

    /// Seed the session peers with scopes consulted earlier.
    pub fn with_peers(self, peers: impl IntoIterator<Item = ScopeName>) -> Self {
        for peer in peers {
            self.remember(&peer);
        }
        self
    }

    /// Scopes that served at least one request, in first-use order.
    pub fn peers(&self) -> Vec<ScopeName> {
        self.peers.lock().expect("lock poisoned").clone()
    }

    pub fn connect(&self, scope: &ScopeName) -> TransportResult<Arc<dyn ScopeTransport>> {
        if let Some(transport) = self.connections.lock().expect("lock poisoned").get(scope) {
            return Ok(Arc::clone(transport));
        }
        let transport = self.connector.connect(scope)?;
        self.connections
            .lock()
            .expect("lock poisoned")
            .insert(scope.clone(), Arc::clone(&transport));
        Ok(transport)
    }

    /// Run one remote call under the configured timeout.
    pub async fn bounded<T>(
        &self,
        scope: &ScopeName,
        call: impl Future<Output = TransportResult<T>>,
    ) -> TransportResult<T> {
        match tokio::time::timeout(self.config.fetch_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                scope: scope.clone(),
                timeout_ms: self.config.fetch_timeout_ms,
            }),
        }
    }

    /// Locate the manifest of `key`.
    ///
    /// `local_aliases` are additional keys under which the local scope may
    /// hold the same version (an unbound local commit and its exported form).
    pub async fn locate(
        &self,
        key: &ComponentVersion,
        local_aliases: &[ComponentVersion],
    ) -> SyncResult<LocatedManifest> {
        for candidate in std::iter::once(key).chain(local_aliases) {
            if let Some(manifest) = self.local.manifest(candidate)? {
                debug!(component = %key, "found in local scope");
                return Ok(LocatedManifest {
                    manifest,
                    source: Source::Local,
                });
            }
        }

        let mut last_source = Source::Local.to_string();
        let mut reason = "not present locally and no remote candidate".to_string();
        for scope in self.candidates(key) {
            last_source = scope.to_string();
            match self.fetch_manifest(&scope, key).await {
                Ok(Some(manifest)) => {
                    self.remember(&scope);
                    debug!(component = %key, source = %scope, "manifest located");
                    return Ok(LocatedManifest {
                        manifest,
                        source: Source::Remote(scope),
                    });
                }
                Ok(None) => reason = format!("{key} is not held by scope {scope}"),
                Err(e) => {
                    warn!(component = %key, source = %scope, error = %e, "source attempt failed");
                    reason = e.to_string();
                }
            }
        }
        Err(SyncError::DependencyUnavailable {
            component: key.clone(),
            last_source,
            reason,
        })
    }

    /// Fetch every blob of a located manifest from the source that served
    /// the manifest.
    pub async fn fetch_blobs(&self, located: &LocatedManifest) -> SyncResult<Vec<Blob>> {
        let key = located.manifest.key();
        let unavailable = |reason: String| SyncError::DependencyUnavailable {
            component: key.clone(),
            last_source: located.source.to_string(),
            reason,
        };

        let mut blobs = Vec::with_capacity(located.manifest.files.len());
        for id in located.manifest.blob_ids() {
            let blob = match &located.source {
                Source::Local => self.local.blob(&id)?,
                Source::Remote(scope) => {
                    let transport = self.connect(scope).map_err(|e| unavailable(e.to_string()))?;
                    self.bounded(scope, transport.fetch_blob(&id))
                        .await
                        .map_err(|e| unavailable(e.to_string()))?
                }
            };
            let blob = blob.ok_or_else(|| unavailable(format!("blob {} is missing", id.short_hex())))?;
            if self.config.verify_blobs {
                blob.verify(&id).map_err(|e| unavailable(e.to_string()))?;
            }
            blobs.push(blob);
        }
        Ok(blobs)
    }

    fn candidates(&self, key: &ComponentVersion) -> Vec<ScopeName> {
        let mut candidates: Vec<ScopeName> = key.id.scope().cloned().into_iter().collect();
        if self.config.consult_session_peers {
            for peer in self.peers() {
                if !candidates.contains(&peer) {
                    candidates.push(peer);
                }
            }
        }
        candidates.retain(|c| Some(c) != self.exclude.as_ref());
        candidates
    }

    async fn fetch_manifest(
        &self,
        scope: &ScopeName,
        key: &ComponentVersion,
    ) -> TransportResult<Option<VersionManifest>> {
        let transport = self.connect(scope)?;
        let manifest = self.bounded(scope, transport.fetch_manifest(key)).await?;
        Ok(manifest.filter(|m| m.key() == *key))
    }

    fn remember(&self, scope: &ScopeName) {
        if self.exclude.as_ref() == Some(scope) {
            return;
        }
        let mut peers = self.peers.lock().expect("lock poisoned");
        if !peers.contains(scope) {
            peers.push(scope.clone());
        }
    }
}
