//! Source Archiver Library
//!
//! Revisits tracked content sources, discovers items newer than the persisted cursor,
//! and downloads them over a pool of egress routes. The cursor only ever advances over
//! a contiguous prefix of the discovery order, so a crash or a failed item never leaves
//! a hole in the archive.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
