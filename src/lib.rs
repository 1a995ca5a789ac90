//! # Intent Broker - Intent Registry and Request Routing
//!
//! Lets applications declare what they can do and routes requests between them:
//! - **Intents**: declarations, visibility and capability rules, the registry
//! - **Server**: request lifecycle, disambiguation, handler start, timeouts
//! - **System**: the boundary to the host's process and IPC layer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use intent_broker::intents::Intent;
//! use intent_broker::monitoring::init_logging;
//! use intent_broker::server::{spawn_intent_server, IntentServerConfig};
//! use intent_broker::system::{ChannelSystemInterface, ClientChannel};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> intent_broker::Result<()> {
//!     let config = IntentServerConfig::default();
//!     init_logging(&config.logging)?;
//!
//!     let (system, mut commands) = ChannelSystemInterface::new();
//!     let system = Arc::new(system);
//!     system.set_running("launcher", Some(ClientChannel::new("launcher", "conn-1")));
//!     let server = spawn_intent_server(config, system.clone())?;
//!
//!     server.register_application("viewer").await?;
//!     server.add_intent(Intent::new("open-image", "viewer")).await?;
//!
//!     let request = server
//!         .submit("launcher", "open-image", None, HashMap::new())
//!         .await?;
//!     println!("Submitted {}", request.id());
//!
//!     while let Some(command) = commands.recv().await {
//!         println!("Host must act on {command:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod intents;
pub mod monitoring;
pub mod server;
pub mod system;

pub use core::error::{Error, Result};
