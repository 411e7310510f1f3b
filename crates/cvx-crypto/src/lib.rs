//! Content hashing for cvx.
//!
//! Every object a scope stores is addressed by a domain-separated BLAKE3
//! hash. Two implementations interoperate only if they agree on these
//! domain tags and on the canonical manifest serialization, so the tags are
//! part of the persisted format and must never change for a given `-vN`.

pub mod hasher;

pub use hasher::{ContentHasher, HasherError};
