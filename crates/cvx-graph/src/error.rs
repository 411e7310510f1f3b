use cvx_store::StoreError;
use cvx_types::{ComponentVersion, Version};

/// Errors produced by version graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The version already exists with different content.
    #[error("version conflict: {component} already exists with different content")]
    VersionConflict { component: ComponentVersion },

    /// A newly minted version is not greater than the latest recorded one.
    #[error("non-monotonic version: {component} is not greater than latest {latest}")]
    NonMonotonicVersion {
        component: ComponentVersion,
        latest: Version,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type GraphResult<T> = Result<T, GraphError>;
