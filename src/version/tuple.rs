//! Numeric version tuples
//!
//! Versions are compared as lists of integers, never as strings, so that
//! `1.9.0 < 1.10.0`. Both `.` and `-` separate components, which lets Debian
//! style tags such as `1.30.2-1551280930` order correctly.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::VersionError;

/// Ordered tuple of non-negative integers parsed from a version string.
///
/// Ordering is lexicographic over the components; a strict prefix sorts
/// before any longer tuple it starts (`1.2 < 1.2.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionTuple(Vec<u64>);

impl VersionTuple {
    pub fn new(components: Vec<u64>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[u64] {
        &self.0
    }

    /// Keeps the first `n` components, padding with zeros when shorter.
    pub fn truncated(&self, n: usize) -> Self {
        let mut components: Vec<u64> = self.0.iter().copied().take(n).collect();
        components.resize(n, 0);
        Self(components)
    }
}

impl FromStr for VersionTuple {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::MalformedVersion(s.to_string()));
        }
        s.split(['.', '-'])
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| VersionError::MalformedVersion(s.to_string()))
    }
}

impl fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Parse a version string into a tuple.
pub fn parse(version: &str) -> Result<VersionTuple, VersionError> {
    version.parse()
}

/// Compare two version tuples.
pub fn compare(a: &VersionTuple, b: &VersionTuple) -> Ordering {
    a.cmp(b)
}

/// Find the greatest parseable version in a list, skipping malformed ones.
pub fn find_max<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter_map(|v| parse(v).ok().map(|parsed| (v, parsed)))
        .max_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(original, _)| original)
}
