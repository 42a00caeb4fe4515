//! Version handling shared by the mirror and the installer
//!
//! - [`tuple`]: numeric version tuples and their total order
//! - [`engine`]: engine constraints declared by extensions

pub mod engine;
pub mod tuple;

pub use engine::{EngineVersion, satisfies};
pub use tuple::{VersionTuple, compare};
