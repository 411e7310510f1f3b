use cvx_graph::GraphError;
use cvx_store::StoreError;
use cvx_types::{ComponentId, ComponentVersion, ScopeName, TypeError, Version};
use thiserror::Error;

/// Failures of the transport collaborator. Distinct from "not found", which
/// transports report as `Ok(None)` / `Ok(false)`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("scope {scope} is unreachable: {reason}")]
    Unreachable { scope: ScopeName, reason: String },

    #[error("request to scope {scope} timed out after {timeout_ms}ms")]
    Timeout { scope: ScopeName, timeout_ms: u64 },

    /// The remote scope failed while serving an otherwise valid request.
    #[error("scope {scope} failed to serve the request: {reason}")]
    Remote { scope: ScopeName, reason: String },

    /// The remote scope refused a pushed batch.
    #[error("scope {scope} rejected the batch: {source}")]
    Rejected {
        scope: ScopeName,
        source: Box<SyncError>,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// An explicitly requested version is already present in the target.
    #[error("component {component} has been already exported to scope {scope}")]
    AlreadyExported {
        component: ComponentVersion,
        scope: ScopeName,
    },

    /// A required version could not be obtained from any candidate source.
    #[error("dependency {component} is unavailable (last tried {last_source}): {reason}")]
    DependencyUnavailable {
        component: ComponentVersion,
        last_source: String,
        reason: String,
    },

    #[error("component was not found: {0}")]
    ComponentNotFound(String),

    #[error("file {path} not found in {component}")]
    FileNotFound {
        component: ComponentVersion,
        path: String,
    },

    #[error("component {component} has not changed since version {latest}")]
    Unchanged { component: ComponentId, latest: Version },

    /// A batch references an object that is neither in the batch nor in the
    /// receiving scope.
    #[error("incomplete batch: {component} references missing {missing}")]
    IncompleteBatch {
        component: ComponentVersion,
        missing: String,
    },

    #[error("scope has no name: {0}")]
    UnnamedScope(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
