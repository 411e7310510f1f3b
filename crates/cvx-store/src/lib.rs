//! Content-addressed object storage for cvx scopes.
//!
//! A scope's object store holds two kinds of immutable objects:
//!
//! - [`Blob`] -- raw file content, keyed by its BLAKE3 hash (domain-separated)
//! - [`VersionManifest`] -- one component version: path -> blob id plus
//!   pinned dependencies, keyed by `(ComponentId, Version)`
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsObjectStore`] -- the persisted scope layout on a local filesystem
//!
//! Transactions buffer their writes in a [`WriteBatch`] and hand it to the
//! scope in one piece.
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written.
//! 2. Blob writes are idempotent "write if absent"; no global lock needed.
//! 3. Blobs before manifests: a manifest is never written while one of its
//!    blobs is missing.
//! 4. Concurrent reads are always safe.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod batch;
pub mod error;
pub mod fs;
pub mod memory;
pub mod object;
pub mod traits;

pub use batch::WriteBatch;
pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;
pub use object::{Blob, VersionManifest};
pub use traits::ObjectStore;
