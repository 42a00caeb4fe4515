//! Offline mirror for an extension gallery and the application it extends.
//!
//! The mirror side resolves, for every requested extension, the newest
//! version compatible with the target engine, fetches what is missing and
//! writes a catalog (`data.json`) plus a Markdown listing. The installer side
//! reads that catalog and brings a machine up to date.
//!
//! # Modules
//!
//! - [`version`]: version tuples and engine constraints
//! - [`fetch`]: conditional single-resource downloads
//! - [`gallery`]: gallery client, response cache and two-phase resolution
//! - [`base`]: base application package resolution
//! - [`catalog`]: catalog records, builder, listing and tool bundling
//! - [`retention`]: purge of historical artifacts
//! - [`install`]: installer-side reconciliation
//! - [`session`]: the context object threaded through a mirror run

pub mod base;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gallery;
pub mod identity;
pub mod install;
pub mod logging;
pub mod process;
pub mod retention;
pub mod session;
pub mod version;
