use std::sync::Arc;

use async_trait::async_trait;
use cvx_store::{Blob, VersionManifest, WriteBatch};
use cvx_types::{ComponentId, ComponentVersion, ObjectId, ScopeName, Version};

use crate::error::{SyncError, SyncResult, TransportError, TransportResult};
use crate::scope::Scope;

/// Open channel to one remote scope.
///
/// Absent objects are `Ok(None)` or `Ok(false)`; `Err` always means the
/// request itself failed.
#[async_trait]
pub trait ScopeTransport: Send + Sync {
    fn scope_name(&self) -> &ScopeName;
    async fn has_manifest(&self, key: &ComponentVersion) -> TransportResult<bool>;
    async fn list_versions(&self, id: &ComponentId) -> TransportResult<Vec<Version>>;
    async fn fetch_manifest(&self, key: &ComponentVersion) -> TransportResult<Option<VersionManifest>>;
    async fn fetch_blob(&self, id: &ObjectId) -> TransportResult<Option<Blob>>;
    async fn push_batch(&self, batch: &WriteBatch) -> TransportResult<()>;
}

/// Yields a transport for a scope name. Discovery and authentication live
/// behind this trait.
pub trait ScopeConnector: Send + Sync {
    fn connect(&self, scope: &ScopeName) -> TransportResult<Arc<dyn ScopeTransport>>;
}

/// Serves a [`Scope`] living in the same process.
#[derive(Clone, Debug)]
pub struct LocalTransport {
    name: ScopeName,
    scope: Arc<Scope>,
}

impl LocalTransport {
    pub fn new(scope: Arc<Scope>) -> SyncResult<Self> {
        let name = scope
            .name()
            .cloned()
            .ok_or_else(|| SyncError::UnnamedScope("the workspace scope cannot be served".into()))?;
        Ok(Self { name, scope })
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    fn remote_error(&self, error: SyncError) -> TransportError {
        TransportError::Remote {
            scope: self.name.clone(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl ScopeTransport for LocalTransport {
    fn scope_name(&self) -> &ScopeName {
        &self.name
    }

    async fn has_manifest(&self, key: &ComponentVersion) -> TransportResult<bool> {
        self.scope.has_version(key).map_err(|e| self.remote_error(e))
    }

    async fn list_versions(&self, id: &ComponentId) -> TransportResult<Vec<Version>> {
        self.scope.versions(id).map_err(|e| self.remote_error(e))
    }

    async fn fetch_manifest(&self, key: &ComponentVersion) -> TransportResult<Option<VersionManifest>> {
        self.scope.manifest(key).map_err(|e| self.remote_error(e))
    }

    async fn fetch_blob(&self, id: &ObjectId) -> TransportResult<Option<Blob>> {
        self.scope.blob(id).map_err(|e| self.remote_error(e))
    }

    async fn push_batch(&self, batch: &WriteBatch) -> TransportResult<()> {
        self.scope
            .apply_batch(batch)
            .map(|_| ())
            .map_err(|e| TransportError::Rejected {
                scope: self.name.clone(),
                source: Box::new(e),
            })
    }
}
