//! The mirrored catalog
//!
//! - [`types`]: records serialized to `data.json`
//! - [`builder`]: entry construction, artifact and icon fetching, persistence
//! - [`listing`]: Markdown listing
//! - [`tools`]: auxiliary tools of the language tooling extension

pub mod builder;
pub mod listing;
pub mod tools;
pub mod types;

pub use builder::{CatalogBuilder, FetchReport, PostAction};
pub use types::{BasePackage, Catalog, CatalogEntry, ToolDefinition};
