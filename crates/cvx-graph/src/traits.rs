use cvx_store::VersionManifest;
use cvx_types::{ComponentId, ComponentVersion, ObjectId, ScopeName, Version};

use crate::error::{GraphError, GraphResult};

/// Result of appending one version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The version was new and is now part of the history.
    Appended,
    /// The version already existed with identical content (idempotent retry).
    AlreadyPresent,
}

/// Per-component ordered version history of one scope.
///
/// Each entry maps `(ComponentId, Version)` to the content id of its
/// manifest. Implementations must serialize appends per component so that
/// two racing appends of the same version resolve deterministically: one
/// wins, the other observes `VersionConflict` or `AlreadyPresent`.
pub trait VersionGraph: Send + Sync {
    /// The scope this graph belongs to (`None` for an unnamed workspace
    /// graph).
    fn owner(&self) -> Option<&ScopeName>;

    fn latest_version(&self, id: &ComponentId) -> GraphResult<Option<Version>>;

    /// All versions of `id`, ascending.
    fn all_versions(&self, id: &ComponentId) -> GraphResult<Vec<Version>>;

    fn manifest_id(&self, key: &ComponentVersion) -> GraphResult<Option<ObjectId>>;

    /// Append one version.
    fn append(&self, manifest: &VersionManifest) -> GraphResult<AppendOutcome>;

    /// Validate then append several versions as one unit: either every
    /// entry is accepted or the graph is left unchanged. Entries are applied
    /// in ascending `(ComponentId, Version)` order.
    fn append_all(&self, manifests: &[VersionManifest]) -> GraphResult<Vec<AppendOutcome>>;

    /// Run the checks of [`Self::append_all`] without changing anything.
    fn check_all(&self, manifests: &[VersionManifest]) -> GraphResult<()>;

    /// Every component with at least one version, sorted.
    fn components(&self) -> GraphResult<Vec<ComponentId>>;

    fn contains(&self, key: &ComponentVersion) -> GraphResult<bool> {
        Ok(self.manifest_id(key)?.is_some())
    }

    /// Check that `key` may be minted as the new latest version of its
    /// component: it must be greater than every version already recorded.
    /// Appends do not apply this rule, since older versions arriving later
    /// are legitimate.
    fn check_successor(&self, key: &ComponentVersion) -> GraphResult<()> {
        match self.latest_version(&key.id)? {
            Some(latest) if latest >= key.version => Err(GraphError::NonMonotonicVersion {
                component: key.clone(),
                latest,
            }),
            _ => Ok(()),
        }
    }
}
