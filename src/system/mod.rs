//! System Interface
//!
//! Boundary between the intent server and the host:
//! - The `SystemInterface` trait consumed by the dispatcher
//! - A message-passing adapter for hosts with their own event loop

pub mod channel;
pub mod interface;

pub use channel::{ChannelSystemInterface, SystemCommand};
pub use interface::{ClientChannel, SystemInterface};
