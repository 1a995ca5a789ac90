//! Monitoring Module
//!
//! Provides observability for the intent broker:
//! - Log levels and formats
//! - Global `tracing` subscriber setup

pub mod logging;

pub use logging::{init_logging, LogFormat, LogLevel, LoggerConfig};
