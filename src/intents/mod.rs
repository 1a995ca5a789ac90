//! Intents
//!
//! Declared application capabilities:
//! - Intent declarations with visibility, capability and parameter rules
//! - The registry of applications, background handlers and intents
//! - Registry change notifications

pub mod events;
pub mod intent;
pub mod registry;

pub use events::{RegistryEvent, RegistryEvents};
pub use intent::{Intent, IntentVisibility};
pub use registry::IntentRegistry;
