use cvx_types::{ComponentVersion, ObjectId, TypeError};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// The requested manifest was not found.
    #[error("component was not found: {0}")]
    ManifestNotFound(ComponentVersion),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {id}: computed {computed}")]
    HashMismatch { id: ObjectId, computed: ObjectId },

    /// A different manifest is already stored under the same key.
    #[error("manifest conflict for {key}: different content already stored")]
    ManifestConflict { key: ComponentVersion },

    /// The manifest violates a structural rule.
    #[error("invalid manifest {key}: {reason}")]
    InvalidManifest { key: ComponentVersion, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A file in the persisted layout cannot be decoded.
    #[error("corrupt object at {path}: {reason}")]
    CorruptObject { path: String, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
