//! Core utilities and common types for the intent broker.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
