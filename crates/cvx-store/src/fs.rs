//! Filesystem-backed object store: the persisted scope layout.
//!
//! On-disk format:
//! ```text
//! <root>/objects/<hex[0..2]>/<hex[2..]>                          raw blob bytes
//! <root>/manifests/<scope>/<namespace>/<name>/<version>.json     canonical manifest JSON
//! ```
//! A missing scope or namespace is written as `-`, which can never be a
//! real identity segment. Every file is written to a temporary file in its
//! destination directory and renamed into place without clobbering, so
//! readers never see a torn object and concurrent writers of the same
//! content converge on one file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use cvx_types::{ComponentVersion, ObjectId};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::object::{Blob, VersionManifest};
use crate::traits::ObjectStore;

const OBJECTS_DIR: &str = "objects";
const MANIFESTS_DIR: &str = "manifests";
const UNSET_SEGMENT: &str = "-";

/// Object store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(MANIFESTS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(OBJECTS_DIR).join(&hex[..2]).join(&hex[2..])
    }

    fn manifest_path(&self, key: &ComponentVersion) -> PathBuf {
        let scope = key.id.scope().map_or(UNSET_SEGMENT, |s| s.as_str());
        let namespace = key.id.namespace().unwrap_or(UNSET_SEGMENT);
        self.root
            .join(MANIFESTS_DIR)
            .join(scope)
            .join(namespace)
            .join(key.id.name())
            .join(format!("{}.json", key.version))
    }

    /// Write `bytes` to `path` atomically. Returns `false` if a file was
    /// already there (the existing file is left untouched).
    fn write_new(path: &Path, bytes: &[u8]) -> StoreResult<bool> {
        let parent = path.parent().ok_or_else(|| StoreError::CorruptObject {
            path: path.display().to_string(),
            reason: "object path has no parent directory".into(),
        })?;
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }

    fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn is_temp_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
    }
}

impl ObjectStore for FsObjectStore {
    fn put_blob(&self, blob: &Blob) -> StoreResult<ObjectId> {
        let id = blob.id();
        let path = self.blob_path(&id);
        if path.exists() {
            return Ok(id);
        }
        if Self::write_new(&path, &blob.data)? {
            debug!(blob = %id.short_hex(), len = blob.len(), "blob written");
        }
        Ok(id)
    }

    fn get_blob(&self, id: &ObjectId) -> StoreResult<Option<Blob>> {
        let Some(bytes) = Self::read_optional(&self.blob_path(id))? else {
            return Ok(None);
        };
        let blob = Blob::new(bytes);
        blob.verify(id)?;
        Ok(Some(blob))
    }

    fn has_blob(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.blob_path(id).is_file())
    }

    fn put_manifest(&self, manifest: &VersionManifest) -> StoreResult<ObjectId> {
        let key = manifest.key();
        let bytes = manifest.to_canonical_bytes()?;
        let content_id = manifest.content_id()?;
        let path = self.manifest_path(&key);

        if !path.exists() && Self::write_new(&path, &bytes)? {
            debug!(manifest = %key, "manifest written");
            return Ok(content_id);
        }

        match Self::read_optional(&path)? {
            Some(existing) if existing == bytes => Ok(content_id),
            Some(_) => Err(StoreError::ManifestConflict { key }),
            None => Err(StoreError::CorruptObject {
                path: path.display().to_string(),
                reason: "manifest vanished during write".into(),
            }),
        }
    }

    fn get_manifest(&self, key: &ComponentVersion) -> StoreResult<Option<VersionManifest>> {
        let path = self.manifest_path(key);
        let Some(bytes) = Self::read_optional(&path)? else {
            return Ok(None);
        };
        let manifest = VersionManifest::from_canonical_bytes(&bytes)?;
        if manifest.key() != *key {
            return Err(StoreError::CorruptObject {
                path: path.display().to_string(),
                reason: format!("file holds {} instead of {key}", manifest.key()),
            });
        }
        Ok(Some(manifest))
    }

    fn has_manifest(&self, key: &ComponentVersion) -> StoreResult<bool> {
        Ok(self.manifest_path(key).is_file())
    }

    fn list_manifests(&self) -> StoreResult<Vec<ComponentVersion>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(self.root.join(MANIFESTS_DIR))
            .min_depth(4)
            .max_depth(4)
        {
            let entry = entry.map_err(|e| StoreError::Io(io::Error::other(e.to_string())))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || Self::is_temp_file(path)
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            match VersionManifest::from_canonical_bytes(&fs::read(path)?) {
                Ok(manifest) => keys.push(manifest.key()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping undecodable manifest");
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn blob_count(&self) -> StoreResult<usize> {
        let mut count = 0;
        for entry in WalkDir::new(self.root.join(OBJECTS_DIR))
            .min_depth(2)
            .max_depth(2)
        {
            let entry = entry.map_err(|e| StoreError::Io(io::Error::other(e.to_string())))?;
            if entry.file_type().is_file() && !Self::is_temp_file(entry.path()) {
                count += 1;
            }
        }
        Ok(count)
    }
}
