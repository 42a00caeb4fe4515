use reqwest::StatusCode;
use thiserror::Error;

use crate::gallery::cache::CacheError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Malformed version: {0}")]
    MalformedVersion(String),

    #[error("Unsupported engine constraint syntax: {0}")]
    UnsupportedConstraintSyntax(String),
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("No version of {0} is compatible with engine {1}")]
    NoCompatibleVersion(String, String),

    #[error("Fetch failed with status {status}: {url}")]
    FetchFailed { status: StatusCode, url: String },

    #[error("Refusing to run with elevated privileges")]
    PrivilegedExecutionRefused,

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}
