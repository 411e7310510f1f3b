//! Scope names and path-segment validation.
//!
//! Every textual part of a component identity (scope, namespace, name) is
//! a single path segment. Segments end up as directory names in the
//! persisted scope layout, so the rules are strict:
//! - Must be non-empty
//! - Must not contain `/`, whitespace, `~`, `^`, `:`, `?`, `*`, `[`, `\`, `@`
//! - Must not contain `..`
//! - Must not start with `.` or `-`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Characters that are forbidden anywhere in a segment.
const FORBIDDEN_CHARS: &[char] = &[
    '/', ' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\', '@',
];

/// Validate one identity segment, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use cvx_types::scope::validate_segment;
///
/// assert!(validate_segment("is-string").is_ok());
/// assert!(validate_segment("").is_err());
/// assert!(validate_segment("a/b").is_err());
/// ```
pub fn validate_segment(segment: &str) -> TypeResult<()> {
    let invalid = |reason: &str| TypeError::InvalidName {
        name: segment.to_string(),
        reason: reason.to_string(),
    };

    if segment.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if let Some(ch) = segment.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(invalid(&format!("contains forbidden character: {ch:?}")));
    }
    if segment.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    if segment.starts_with('.') || segment.starts_with('-') {
        return Err(invalid("must not start with '.' or '-'"));
    }
    Ok(())
}

/// Name of a scope: an independent object store and version-graph authority.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeName(String);

impl ScopeName {
    /// Create a validated scope name.
    pub fn new(name: impl Into<String>) -> TypeResult<Self> {
        let name = name.into();
        validate_segment(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeName({})", self.0)
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScopeName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ScopeName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScopeName> for String {
    fn from(name: ScopeName) -> Self {
        name.0
    }
}

impl AsRef<str> for ScopeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
