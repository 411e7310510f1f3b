use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::scope::{validate_segment, ScopeName};
use crate::version::Version;

/// Stands in for the missing namespace of a scope-bound id. It can never be
/// a real segment, since segments must not start with `-`.
const NO_NAMESPACE: &str = "-";

/// Identity of a component: `[scope/][namespace/]name`.
///
/// The scope part is empty for a component that has never been exported.
/// It is bound on first successful export and never changes afterwards;
/// [`ComponentId::bind`] enforces that by leaving bound ids untouched.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    scope: Option<ScopeName>,
    namespace: Option<String>,
    name: String,
}

impl ComponentId {
    /// Create an unbound component id.
    pub fn new(namespace: Option<&str>, name: &str) -> TypeResult<Self> {
        if let Some(ns) = namespace {
            validate_segment(ns)?;
        }
        validate_segment(name)?;
        Ok(Self {
            scope: None,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Create a component id already bound to `scope`.
    pub fn scoped(scope: ScopeName, namespace: Option<&str>, name: &str) -> TypeResult<Self> {
        Ok(Self::new(namespace, name)?.bind(&scope))
    }

    pub fn scope(&self) -> Option<&ScopeName> {
        self.scope.as_ref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the id carries a scope binding.
    pub fn is_bound(&self) -> bool {
        self.scope.is_some()
    }

    /// Bind an unbound id to `scope`. Already-bound ids are returned as-is.
    pub fn bind(&self, scope: &ScopeName) -> Self {
        match self.scope {
            Some(_) => self.clone(),
            None => Self {
                scope: Some(scope.clone()),
                ..self.clone()
            },
        }
    }

    /// The same id with the scope part stripped (`namespace/name`).
    pub fn unscoped(&self) -> Self {
        Self {
            scope: None,
            ..self.clone()
        }
    }

    /// Pair this id with a version.
    pub fn at(&self, version: Version) -> ComponentVersion {
        ComponentVersion::new(self.clone(), version)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.scope, &self.namespace) {
            (Some(scope), Some(ns)) => write!(f, "{scope}/{ns}/")?,
            (Some(scope), None) => write!(f, "{scope}/{NO_NAMESPACE}/")?,
            (None, Some(ns)) => write!(f, "{ns}/")?,
            (None, None) => {}
        }
        f.write_str(&self.name)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({self})")
    }
}

impl FromStr for ComponentId {
    type Err = TypeError;

    /// One segment is `name`, two are `namespace/name`, three are
    /// `scope/namespace/name`, where a namespace of `-` means none.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |e: TypeError| TypeError::InvalidComponentId {
            input: s.to_string(),
            reason: e.to_string(),
        };
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] => Self::new(None, name).map_err(invalid),
            [ns, name] => Self::new(Some(ns), name).map_err(invalid),
            [scope, ns, name] => {
                let scope = ScopeName::new(*scope).map_err(invalid)?;
                let ns = (*ns != NO_NAMESPACE).then_some(*ns);
                Self::scoped(scope, ns, name).map_err(invalid)
            }
            _ => Err(TypeError::InvalidComponentId {
                input: s.to_string(),
                reason: "expected [scope/][namespace/]name".into(),
            }),
        }
    }
}

/// A `(ComponentId, Version)` pair: the key of one immutable manifest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentVersion {
    pub id: ComponentId,
    pub version: Version,
}

impl ComponentVersion {
    pub fn new(id: ComponentId, version: Version) -> Self {
        Self { id, version }
    }

    /// The same pair with its id bound to `scope` (no-op when already bound).
    pub fn bind(&self, scope: &ScopeName) -> Self {
        Self {
            id: self.id.bind(scope),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

impl fmt::Debug for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentVersion({self})")
    }
}

impl FromStr for ComponentVersion {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, version) = s.rsplit_once('@').ok_or_else(|| TypeError::InvalidComponentId {
            input: s.to_string(),
            reason: "expected id@version".into(),
        })?;
        Ok(Self::new(id.parse()?, version.parse()?))
    }
}
