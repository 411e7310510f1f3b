use std::collections::{BTreeMap, BTreeSet};

use cvx_crypto::ContentHasher;
use cvx_types::{ComponentId, ComponentVersion, ObjectId, ScopeName, Version};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Raw byte content of one file, addressed by its content hash.
///
/// Bytes are kept exactly as given: no transcoding, no line-ending or
/// encoding transformation.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    /// Create a new blob from raw bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// The content-addressed id of this blob.
    pub fn id(&self) -> ObjectId {
        ContentHasher::BLOB.hash(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check that `id` is the hash of this blob's bytes.
    pub fn verify(&self, id: &ObjectId) -> StoreResult<()> {
        let computed = self.id();
        if computed != *id {
            return Err(StoreError::HashMismatch {
                id: *id,
                computed,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("id", &self.id())
            .field("len", &self.data.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// VersionManifest
// ---------------------------------------------------------------------------

/// Immutable record for one `(ComponentId, Version)`.
///
/// Maps relative paths to blob ids and pins every dependency to an exact
/// version. The canonical serialization is the `serde_json` encoding of this
/// struct; sorted maps keep it deterministic, and [`Self::content_id`] hashes
/// exactly those bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    pub id: ComponentId,
    pub version: Version,
    /// Relative path -> blob id.
    pub files: BTreeMap<String, ObjectId>,
    /// Exact pinned dependency versions.
    pub dependencies: BTreeSet<ComponentVersion>,
    pub main_file: Option<String>,
    /// Scope this version was first exported to. Set once, never changed.
    pub origin: Option<ScopeName>,
}

impl VersionManifest {
    /// Create an empty manifest for `id@version`.
    pub fn new(id: ComponentId, version: Version) -> Self {
        Self {
            id,
            version,
            files: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            main_file: None,
            origin: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, blob: ObjectId) -> Self {
        self.files.insert(path.into(), blob);
        self
    }

    pub fn with_dependency(mut self, dependency: ComponentVersion) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    pub fn with_main_file(mut self, path: impl Into<String>) -> Self {
        self.main_file = Some(path.into());
        self
    }

    pub fn with_origin(mut self, origin: ScopeName) -> Self {
        self.origin = Some(origin);
        self
    }

    /// The store key of this manifest.
    pub fn key(&self) -> ComponentVersion {
        ComponentVersion::new(self.id.clone(), self.version.clone())
    }

    /// Every blob id referenced by this manifest (deduplicated).
    pub fn blob_ids(&self) -> BTreeSet<ObjectId> {
        self.files.values().copied().collect()
    }

    /// Canonical byte encoding used for hashing and persistence.
    pub fn to_canonical_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode a manifest from its canonical bytes.
    pub fn from_canonical_bytes(bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Content hash of the canonical encoding.
    pub fn content_id(&self) -> StoreResult<ObjectId> {
        ContentHasher::MANIFEST
            .hash_json(self)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Check structural rules: safe relative paths, a main file that exists,
    /// and no self-dependency.
    pub fn validate(&self) -> StoreResult<()> {
        let invalid = |reason: String| StoreError::InvalidManifest {
            key: self.key(),
            reason,
        };

        for path in self.files.keys() {
            if path.is_empty()
                || path.starts_with('/')
                || path.contains('\\')
                || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
            {
                return Err(invalid(format!("unsafe file path {path:?}")));
            }
        }

        if let Some(main) = &self.main_file {
            if !self.files.contains_key(main) {
                return Err(invalid(format!("main file {main:?} is not among the files")));
            }
        }

        if self.dependencies.iter().any(|d| d.id == self.id) {
            return Err(invalid("a component cannot depend on itself".into()));
        }

        Ok(())
    }

    /// The form this manifest takes once exported to `scope`.
    ///
    /// An unbound id is bound to `scope`, unbound dependency pins are bound
    /// to `scope`, and a missing origin becomes `scope`. Bound ids, bound
    /// pins and an existing origin are left untouched.
    pub fn bind(&self, scope: &ScopeName) -> Self {
        Self {
            id: self.id.bind(scope),
            version: self.version.clone(),
            files: self.files.clone(),
            dependencies: self.dependencies.iter().map(|d| d.bind(scope)).collect(),
            main_file: self.main_file.clone(),
            origin: Some(self.origin.clone().unwrap_or_else(|| scope.clone())),
        }
    }
}
