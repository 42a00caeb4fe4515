//! Package identity: `publisher.name`, optionally suffixed with a platform

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid package identity: {0} (expected publisher.name)")]
pub struct InvalidIdentity(pub String);

/// Composite key identifying one logical package in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageIdentity {
    publisher: String,
    name: String,
    platform: Option<String>,
}

impl PackageIdentity {
    pub fn new(publisher: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            publisher: publisher.into(),
            name: name.into(),
            platform: None,
        }
    }

    /// Derive the identity of a platform specific variant (`publisher.name-platform`).
    pub fn with_platform(&self, platform: impl Into<String>) -> Self {
        Self {
            publisher: self.publisher.clone(),
            name: self.name.clone(),
            platform: Some(platform.into()),
        }
    }

    pub fn publisher(&self) -> &str {
        &self.publisher
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    /// Identity without the platform suffix
    pub fn base(&self) -> Self {
        Self::new(self.publisher.clone(), self.name.clone())
    }

    /// Case-insensitive lookup key
    pub fn lookup_key(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.publisher, self.name)?;
        if let Some(platform) = &self.platform {
            write!(f, "-{}", platform)?;
        }
        Ok(())
    }
}

/// Parses `publisher.name`. A platform suffix cannot be told apart from a
/// hyphenated name, so it is kept as part of the name.
impl FromStr for PackageIdentity {
    type Err = InvalidIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((publisher, name)) if !publisher.is_empty() && !name.is_empty() => {
                Ok(Self::new(publisher, name))
            }
            _ => Err(InvalidIdentity(s.to_string())),
        }
    }
}
