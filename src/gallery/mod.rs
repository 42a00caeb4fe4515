//! Extension gallery access
//!
//! - [`types`]: request and response records of the query protocol
//! - [`client`]: `Gallery` trait and the marketplace implementation
//! - [`cache`]: optional SQLite cache of query responses
//! - [`query`]: two-phase resolution of compatible versions
//! - [`releases`]: per-platform installers from a release feed

pub mod cache;
pub mod client;
pub mod query;
pub mod releases;
pub mod types;

pub use client::{Gallery, MarketplaceGallery};
pub use query::{Resolution, ResolvedPackage, resolve_packages};
pub use releases::{GitHubReleases, ReleaseFeed};
