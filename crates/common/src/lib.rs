//! Shared types and error definitions used across all drydock crates.

pub mod error;

pub use error::{Error, Result};
