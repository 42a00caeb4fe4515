pub mod gallery;
pub mod host;

pub use gallery::*;
