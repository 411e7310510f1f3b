//! Foundation types for cvx.
//!
//! This crate provides the identity and addressing types shared by every
//! other cvx crate: content hashes, scope names, component identities and
//! the per-component version ordinal.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Content-addressed identifier (BLAKE3 hash)
//! - [`ScopeName`] -- Name of an independent object-store authority
//! - [`ComponentId`] -- `[scope/][namespace/]name`, scope bound on first export
//! - [`Version`] -- Positive, strictly increasing `major.minor.patch` ordinal
//! - [`ComponentVersion`] -- `(ComponentId, Version)`, the key of a manifest

pub mod component;
pub mod error;
pub mod object;
pub mod scope;
pub mod version;

pub use component::{ComponentId, ComponentVersion};
pub use error::{TypeError, TypeResult};
pub use object::ObjectId;
pub use scope::ScopeName;
pub use version::Version;
