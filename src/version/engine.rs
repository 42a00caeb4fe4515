//! Engine compatibility constraints
//!
//! Extensions declare the minimum host version they run on, e.g. `^1.29.0`.
//! Only the caret form is understood; a bare version is accepted as if the
//! caret were present, and `*` matches everything.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::VersionError;
use crate::version::tuple::VersionTuple;

/// Number of components taken into account when comparing engine versions
const ENGINE_COMPONENTS: usize = 3;

/// Version of the host application extensions must be compatible with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineVersion {
    /// Accept every extension version
    Any,
    Exact(VersionTuple),
}

impl EngineVersion {
    /// Engine from an explicit override such as `1.30`, padded to three components.
    pub fn from_override(value: &str) -> Result<Self, VersionError> {
        if value == "*" {
            return Ok(Self::Any);
        }
        let tuple: VersionTuple = value.parse()?;
        Ok(Self::Exact(tuple.truncated(ENGINE_COMPONENTS)))
    }

    /// Engine deduced from the base application version: `major.minor.0`.
    ///
    /// Release 1.29 shipped with engine 1.29.1, so `1.29.x` maps to `1.29.1`.
    pub fn from_application_version(version: &str) -> Result<Self, VersionError> {
        let tuple: VersionTuple = version.parse()?;
        let mut components = tuple.truncated(2).components().to_vec();
        components.push(0);
        if components == [1, 29, 0] {
            components[2] = 1;
        }
        let engine = VersionTuple::new(components);
        debug!("engine version {} deduced from {}", engine, version);
        Ok(Self::Exact(engine))
    }

    /// Check whether an extension's engine constraint accepts this engine.
    pub fn satisfies(&self, constraint: &str) -> Result<bool, VersionError> {
        if constraint == "*" {
            return Ok(true);
        }
        let Self::Exact(engine) = self else {
            return Ok(true);
        };

        let required = parse_constraint(constraint)?;
        Ok(engine.truncated(ENGINE_COMPONENTS) >= required.truncated(ENGINE_COMPONENTS))
    }
}

impl FromStr for EngineVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_override(s)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(tuple) => write!(f, "{}", tuple),
        }
    }
}

/// Extract the minimum version from a `^x.y.z` (or bare `x.y.z`) constraint.
///
/// Anything after the leading run of digits and dots is ignored, so
/// `^1.30.0-insider` requires `1.30.0`.
fn parse_constraint(constraint: &str) -> Result<VersionTuple, VersionError> {
    let body = match constraint.strip_prefix('^') {
        Some(rest) => rest,
        None if constraint.starts_with(|c: char| c.is_ascii_digit()) => constraint,
        None => {
            return Err(VersionError::UnsupportedConstraintSyntax(
                constraint.to_string(),
            ));
        }
    };

    let end = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(body.len());
    body[..end]
        .parse()
        .map_err(|_| VersionError::MalformedVersion(constraint.to_string()))
}

/// Check an engine version string against an extension's constraint.
///
/// `engine == "*"` or `constraint == "*"` always holds.
pub fn satisfies(engine: &str, constraint: &str) -> Result<bool, VersionError> {
    if engine == "*" || constraint == "*" {
        return Ok(true);
    }
    let engine: VersionTuple = engine.parse()?;
    EngineVersion::Exact(engine).satisfies(constraint)
}
