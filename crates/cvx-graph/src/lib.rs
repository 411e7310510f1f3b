//! Version history of cvx scopes.
//!
//! A scope's [`VersionGraph`] orders the versions of every component it
//! holds:
//!
//! 1. A `(ComponentId, Version)` never changes content once recorded
//!    ([`GraphError::VersionConflict`]); re-appending identical content is a
//!    no-op ([`AppendOutcome::AlreadyPresent`]).
//! 2. Versions may arrive in any order, so several versions of one
//!    component coexist and an older pinned version can join a history
//!    that already has newer ones.
//! 3. A newly minted version must exceed the latest one
//!    ([`VersionGraph::check_successor`], [`GraphError::NonMonotonicVersion`]).
//!
//! The graph is a derived index over the object store and can be rebuilt
//! from it at any time with [`InMemoryVersionGraph::from_store`].

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{GraphError, GraphResult};
pub use memory::InMemoryVersionGraph;
pub use traits::{AppendOutcome, VersionGraph};
