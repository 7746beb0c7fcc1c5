//! hoard-core: error and configuration primitives shared by the hoard crates.

pub mod config;
pub mod errors;

pub use config::{HoardConfig, HoardConfigSnapshot};
pub use errors::{ErrorKind, HoardError, HoardResult};
