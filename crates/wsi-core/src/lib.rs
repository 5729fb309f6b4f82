//! Core types and utilities for the whole-slide image MIL pipeline.
//!
//! This crate provides the error taxonomy, the configuration surface and
//! the small shared types used by the dataset, loader and model crates.

pub mod cli;
pub mod config;
pub mod error;
pub mod types;

pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
}
