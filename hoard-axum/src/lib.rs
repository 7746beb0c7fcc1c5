//! hoard-axum: the HTTP surface of hoard on axum.
//!
//! Routes cover whole-file and chunked uploads, range-aware reads of single
//! and merged files, metadata edits, listings and the trash lifecycle.
//! Failures are returned as `{ "success": false, "message", "name", "code",
//! "className" }` with the matching status.

pub mod app;
pub mod multipart;
pub mod response;
pub mod routes;
pub mod state;
mod error;
pub use error::{blob_to_hoard, HoardAxumError};
pub use state::HoardState;

pub use app::{hoard, HoardApp};
