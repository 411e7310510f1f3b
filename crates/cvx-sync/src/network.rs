//! In-process network of scopes.
//!
//! [`InMemoryNetwork`] maps scope names to [`Scope`] values living in the
//! same process. Scopes can be taken offline and given artificial latency,
//! which lets outage and timeout behavior be exercised without sockets.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use cvx_store::{Blob, VersionManifest, WriteBatch};
use cvx_types::{ComponentId, ComponentVersion, ObjectId, ScopeName, Version};
use tracing::debug;

use crate::error::{SyncResult, TransportError, TransportResult};
use crate::scope::Scope;
use crate::transport::{LocalTransport, ScopeConnector, ScopeTransport};

#[derive(Default)]
struct NetworkState {
    scopes: RwLock<HashMap<ScopeName, Arc<Scope>>>,
    offline: RwLock<HashSet<ScopeName>>,
    latency: RwLock<HashMap<ScopeName, Duration>>,
}

impl NetworkState {
    /// Apply the configured latency, then fail if the scope is offline.
    async fn gate(&self, scope: &ScopeName) -> TransportResult<()> {
        let delay = self
            .latency
            .read()
            .expect("lock poisoned")
            .get(scope)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.read().expect("lock poisoned").contains(scope) {
            return Err(TransportError::Unreachable {
                scope: scope.clone(),
                reason: "scope is offline".into(),
            });
        }
        Ok(())
    }
}

/// Registry of named scopes reachable in-process. Cloning shares the
/// registry.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<NetworkState>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named scope, replacing any scope of the same name.
    pub fn register(&self, scope: Arc<Scope>) -> SyncResult<()> {
        let transport = LocalTransport::new(scope)?;
        let name = transport.scope_name().clone();
        debug!(scope = %name, "scope registered");
        self.state
            .scopes
            .write()
            .expect("lock poisoned")
            .insert(name, Arc::clone(transport.scope()));
        Ok(())
    }

    /// Create an empty in-memory scope called `name` and register it.
    pub fn add_scope(&self, name: &str) -> SyncResult<Arc<Scope>> {
        let scope = Arc::new(Scope::in_memory(ScopeName::new(name)?));
        self.register(Arc::clone(&scope))?;
        Ok(scope)
    }

    pub fn scope(&self, name: &ScopeName) -> Option<Arc<Scope>> {
        self.state
            .scopes
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn set_offline(&self, name: &ScopeName, offline: bool) {
        let mut set = self.state.offline.write().expect("lock poisoned");
        if offline {
            set.insert(name.clone());
        } else {
            set.remove(name);
        }
    }

    /// Delay every request to `name` by `latency` (zero removes the delay).
    pub fn set_latency(&self, name: &ScopeName, latency: Duration) {
        let mut map = self.state.latency.write().expect("lock poisoned");
        if latency.is_zero() {
            map.remove(name);
        } else {
            map.insert(name.clone(), latency);
        }
    }
}

impl ScopeConnector for InMemoryNetwork {
    fn connect(&self, scope: &ScopeName) -> TransportResult<Arc<dyn ScopeTransport>> {
        let Some(target) = self.scope(scope) else {
            return Err(TransportError::Unreachable {
                scope: scope.clone(),
                reason: "no such scope on the network".into(),
            });
        };
        let inner = LocalTransport::new(target).map_err(|e| TransportError::Unreachable {
            scope: scope.clone(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(NetworkTransport {
            state: Arc::clone(&self.state),
            inner,
        }))
    }
}

impl std::fmt::Debug for InMemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self
            .state
            .scopes
            .read()
            .expect("lock poisoned")
            .keys()
            .map(|n| n.to_string())
            .collect();
        names.sort();
        f.debug_struct("InMemoryNetwork").field("scopes", &names).finish()
    }
}

/// A [`LocalTransport`] subject to the network's outage and latency
/// settings.
struct NetworkTransport {
    state: Arc<NetworkState>,
    inner: LocalTransport,
}

#[async_trait]
impl ScopeTransport for NetworkTransport {
    fn scope_name(&self) -> &ScopeName {
        self.inner.scope_name()
    }

    async fn has_manifest(&self, key: &ComponentVersion) -> TransportResult<bool> {
        self.state.gate(self.scope_name()).await?;
        self.inner.has_manifest(key).await
    }

    async fn list_versions(&self, id: &ComponentId) -> TransportResult<Vec<Version>> {
        self.state.gate(self.scope_name()).await?;
        self.inner.list_versions(id).await
    }

    async fn fetch_manifest(&self, key: &ComponentVersion) -> TransportResult<Option<VersionManifest>> {
        self.state.gate(self.scope_name()).await?;
        self.inner.fetch_manifest(key).await
    }

    async fn fetch_blob(&self, id: &ObjectId) -> TransportResult<Option<Blob>> {
        self.state.gate(self.scope_name()).await?;
        self.inner.fetch_blob(id).await
    }

    async fn push_batch(&self, batch: &WriteBatch) -> TransportResult<()> {
        self.state.gate(self.scope_name()).await?;
        self.inner.push_batch(batch).await
    }
}
