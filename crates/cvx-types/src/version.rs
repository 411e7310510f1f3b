use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Per-component version ordinal.
///
/// Versions are `major.minor.patch` triples compared numerically. A bare
/// positive integer `N` is accepted as shorthand for `0.0.N`. Pre-release
/// and build metadata are rejected, and `0.0.0` is not a valid version:
/// the first version of any component is `0.0.1`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(semver::Version);

impl Version {
    /// Create a version from its parts.
    pub fn new(major: u64, minor: u64, patch: u64) -> TypeResult<Self> {
        Self::checked(semver::Version::new(major, minor, patch), || {
            format!("{major}.{minor}.{patch}")
        })
    }

    /// The version assigned to the first commit of a component.
    pub fn first() -> Self {
        Self(semver::Version::new(0, 0, 1))
    }

    /// The next version after this one (patch bump). Fails once the patch
    /// ordinal is exhausted.
    pub fn next(&self) -> TypeResult<Self> {
        let patch = self.0.patch.checked_add(1).ok_or_else(|| TypeError::InvalidVersion {
            input: self.to_string(),
            reason: "patch ordinal overflow".into(),
        })?;
        Ok(Self(semver::Version::new(self.0.major, self.0.minor, patch)))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    fn checked(v: semver::Version, input: impl FnOnce() -> String) -> TypeResult<Self> {
        let invalid = |reason: &str| TypeError::InvalidVersion {
            input: input(),
            reason: reason.to_string(),
        };
        if !v.pre.is_empty() || !v.build.is_empty() {
            return Err(invalid("pre-release and build metadata are not supported"));
        }
        if v.major == 0 && v.minor == 0 && v.patch == 0 {
            return Err(invalid("versions start at 0.0.1"));
        }
        Ok(Self(v))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let ordinal: u64 = s.parse().map_err(|e: std::num::ParseIntError| {
                TypeError::InvalidVersion {
                    input: s.to_string(),
                    reason: e.to_string(),
                }
            })?;
            semver::Version::new(0, 0, ordinal)
        } else {
            semver::Version::parse(s).map_err(|e| TypeError::InvalidVersion {
                input: s.to_string(),
                reason: e.to_string(),
            })?
        };
        Self::checked(parsed, || s.to_string())
    }
}

impl TryFrom<String> for Version {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_dotted_form() {
        let v: Version = "0.0.2".parse().unwrap();
        assert_eq!((v.major(), v.minor(), v.patch()), (0, 0, 2));
    }

    #[test]
    fn bare_integer_is_patch_ordinal() {
        let v: Version = "3".parse().unwrap();
        assert_eq!(v, Version::new(0, 0, 3).unwrap());
    }

    #[test]
    fn zero_is_rejected() {
        assert!("0".parse::<Version>().is_err());
        assert!("0.0.0".parse::<Version>().is_err());
        assert!(Version::new(0, 0, 0).is_err());
    }

    #[test]
    fn prerelease_is_rejected() {
        let err = "1.0.0-beta".parse::<Version>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidVersion { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("latest".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn next_bumps_patch() {
        assert_eq!(Version::first().to_string(), "0.0.1");
        assert_eq!(Version::first().next().unwrap().to_string(), "0.0.2");
    }

    #[test]
    fn next_refuses_to_wrap() {
        let last = Version::new(0, 0, u64::MAX).unwrap();
        let err = last.next().unwrap_err();
        assert!(matches!(err, TypeError::InvalidVersion { .. }));
        assert_eq!(
            Version::new(1, 2, u64::MAX - 1).unwrap().next().unwrap(),
            Version::new(1, 2, u64::MAX).unwrap()
        );
    }

    #[test]
    fn ordering_is_numeric() {
        let v9: Version = "0.0.9".parse().unwrap();
        let v10: Version = "0.0.10".parse().unwrap();
        assert!(v9 < v10);
    }

    #[test]
    fn serde_uses_dotted_string() {
        let v = Version::first();
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"0.0.1\"");
        let back: Version = serde_json::from_str("\"0.0.1\"").unwrap();
        assert_eq!(back, v);
    }

    proptest! {
        #[test]
        fn display_parse_roundtrip(major in 0u64..1000, minor in 0u64..1000, patch in 1u64..1000) {
            let v = Version::new(major, minor, patch).unwrap();
            let parsed: Version = v.to_string().parse().unwrap();
            prop_assert_eq!(parsed, v);
        }

        #[test]
        fn ordering_matches_tuples(
            a in (0u64..50, 0u64..50, 1u64..50),
            b in (0u64..50, 0u64..50, 1u64..50),
        ) {
            let va = Version::new(a.0, a.1, a.2).unwrap();
            let vb = Version::new(b.0, b.1, b.2).unwrap();
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }

        #[test]
        fn next_is_strictly_greater(major in 0u64..100, minor in 0u64..100, patch in 1u64..100) {
            let v = Version::new(major, minor, patch).unwrap();
            prop_assert!(v.next().unwrap() > v);
        }
    }
}
