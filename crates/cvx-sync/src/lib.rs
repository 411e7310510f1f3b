//! Export and resolution engine for cvx scopes.
//!
//! Moves component versions between independent scopes. An export computes
//! the full dependency closure a target scope needs, fetches whatever the
//! target lacks from the scopes that hold it, and commits everything to the
//! target as one batch, or nothing at all.
//!
//! - [`Scope`] -- an object store plus version graph, one value per scope
//! - [`ScopeTransport`] / [`ScopeConnector`] -- channel to a remote scope;
//!   [`InMemoryNetwork`] connects scopes living in one process
//! - [`ClosureResolver`] -- breadth-first closure against a target
//! - [`SourceLocator`] -- local cache, then the version's own scope, then
//!   session peers
//! - [`ExportTransaction`] -- the all-or-nothing export state machine
//! - [`Workspace`] -- commits, staging, imports and scope bindings

pub mod config;
pub mod error;
pub mod export;
pub mod locator;
pub mod network;
pub mod resolver;
pub mod scope;
pub mod transport;
pub mod workspace;

pub use config::ExportConfig;
pub use error::{SyncError, SyncResult, TransportError, TransportResult};
pub use export::{ExportOutcome, ExportReport, ExportRequest, ExportState, ExportTransaction};
pub use locator::{LocatedManifest, Source, SourceLocator};
pub use network::InMemoryNetwork;
pub use resolver::{Closure, ClosureResolver};
pub use scope::{ComponentSummary, Scope};
pub use transport::{LocalTransport, ScopeConnector, ScopeTransport};
pub use workspace::{CommitOptions, ExportSelection, Workspace};
