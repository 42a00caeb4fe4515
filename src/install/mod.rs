//! Installer side: bring a machine up to date from a mirror
//!
//! - [`source`]: reading the published catalog and artifacts
//! - [`host`]: the local client, package database and platform
//! - [`reconcile`]: planning and executing installs and upgrades

pub mod host;
pub mod reconcile;
pub mod source;

pub use reconcile::{Action, Installer, InventoryReport, Plan, PostAction};
pub use source::MirrorSource;
