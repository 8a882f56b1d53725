// src/version/mod.rs

//! Release version parsing and precedence
//!
//! Release versions are semantic versions. Ordering follows semver
//! precedence: `major.minor.patch` first, then pre-release (a release
//! outranks any of its pre-releases). Build metadata never affects
//! ordering, so `1.2.0+a` and `1.2.0+b` are the same release.

use crate::error::{Error, Result};
use semver::Version;
use std::cmp::Ordering;

/// Parse a release version string
///
/// Surrounding whitespace is ignored. Anything semver rejects is an
/// `InvalidVersion` error.
pub fn parse_version(s: &str) -> Result<Version> {
    Version::parse(s.trim()).map_err(|e| Error::InvalidVersion(format!("'{}': {}", s, e)))
}

/// Compare two versions by precedence, ignoring build metadata
pub fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// True when `a` and `b` name the same release
pub fn same_release(a: &Version, b: &Version) -> bool {
    cmp_precedence(a, b) == Ordering::Equal
}

/// True when `a` is strictly newer than `b`
pub fn is_newer(a: &Version, b: &Version) -> bool {
    cmp_precedence(a, b) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_version(s).unwrap()
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(v(" 1.2.3 "), Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_version("1.2"),
            Err(Error::InvalidVersion(_))
        ));
        assert!(parse_version("banana").is_err());
    }

    #[test]
    fn test_prerelease_sorts_below_release() {
        assert!(is_newer(&v("1.0.0"), &v("1.0.0-beta.2")));
        assert!(is_newer(&v("1.0.0-beta.10"), &v("1.0.0-beta.2")));
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert!(same_release(&v("2.1.0+build.7"), &v("2.1.0+build.9")));
        assert!(!is_newer(&v("2.1.0+z"), &v("2.1.0+a")));
    }

    #[test]
    fn test_numeric_components() {
        assert!(is_newer(&v("1.10.0"), &v("1.9.9")));
        assert_eq!(cmp_precedence(&v("0.1.0"), &v("0.2.0")), Ordering::Less);
    }
}
