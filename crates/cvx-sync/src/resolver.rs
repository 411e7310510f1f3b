use std::collections::{BTreeMap, BTreeSet, HashSet};

use cvx_types::{ComponentId, ComponentVersion};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::SyncResult;
use crate::locator::{LocatedManifest, SourceLocator};
use crate::transport::ScopeTransport;

/// The transitive set of versions a target needs for a set of roots.
///
/// Both halves are keyed by *effective* key: the identity the version has
/// (or will have) inside the target.
#[derive(Debug, Default)]
pub struct Closure {
    /// Versions the target already holds. Their dependencies were not
    /// expanded; presence in a scope implies a complete closure there.
    pub present: BTreeSet<ComponentVersion>,
    /// Versions the target lacks, with the manifest as found at its source.
    pub missing: BTreeMap<ComponentVersion, LocatedManifest>,
}

impl Closure {
    pub fn len(&self) -> usize {
        self.present.len() + self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Visit {
    Present(ComponentVersion),
    Missing(ComponentVersion, LocatedManifest),
}

/// Breadth-first dependency closure against one target scope.
///
/// Each wave checks the target for every pending key and locates the
/// manifests it lacks, up to `max_concurrent` at a time; the dependencies of
/// located manifests form the next wave. Keys are memoized so every version
/// is visited once.
pub struct ClosureResolver<'a> {
    target: &'a dyn ScopeTransport,
    locator: &'a SourceLocator<'a>,
    bindings: &'a BTreeMap<ComponentId, ComponentId>,
    max_concurrent: usize,
}

impl<'a> ClosureResolver<'a> {
    pub fn new(
        target: &'a dyn ScopeTransport,
        locator: &'a SourceLocator<'a>,
        bindings: &'a BTreeMap<ComponentId, ComponentId>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            target,
            locator,
            bindings,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// The identity `id` has in the target: its persisted binding if it has
    /// one, otherwise `id` bound to the target (a no-op for bound ids).
    pub fn effective_id(&self, id: &ComponentId) -> ComponentId {
        self.bindings
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.bind(self.target.scope_name()))
    }

    pub fn effective(&self, key: &ComponentVersion) -> ComponentVersion {
        self.effective_id(&key.id).at(key.version.clone())
    }

    pub async fn resolve(
        &self,
        roots: impl IntoIterator<Item = ComponentVersion>,
    ) -> SyncResult<Closure> {
        let mut closure = Closure::default();
        let mut visited = HashSet::new();
        let mut wave: Vec<ComponentVersion> = roots
            .into_iter()
            .filter(|key| visited.insert(self.effective(key)))
            .collect();

        let mut depth = 0usize;
        while !wave.is_empty() {
            debug!(depth, pending = wave.len(), "resolution wave");
            let visits: Vec<Visit> = stream::iter(wave)
                .map(|key| self.visit(key))
                .buffer_unordered(self.max_concurrent)
                .try_collect()
                .await?;

            let mut next = Vec::new();
            for visit in visits {
                match visit {
                    Visit::Present(key) => {
                        closure.present.insert(key);
                    }
                    Visit::Missing(key, located) => {
                        for dependency in &located.manifest.dependencies {
                            if visited.insert(self.effective(dependency)) {
                                next.push(dependency.clone());
                            }
                        }
                        closure.missing.insert(key, located);
                    }
                }
            }
            wave = next;
            depth += 1;
        }

        debug!(
            present = closure.present.len(),
            missing = closure.missing.len(),
            "closure resolved"
        );
        Ok(closure)
    }

    async fn visit(&self, key: ComponentVersion) -> SyncResult<Visit> {
        let effective = self.effective(&key);
        let scope = self.target.scope_name();
        if self
            .locator
            .bounded(scope, self.target.has_manifest(&effective))
            .await?
        {
            return Ok(Visit::Present(effective));
        }

        let aliases: Vec<ComponentVersion> = if effective == key {
            Vec::new()
        } else {
            vec![key]
        };
        let located = self.locator.locate(&effective, &aliases).await?;
        Ok(Visit::Missing(effective, located))
    }
}
