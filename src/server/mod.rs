//! Intent Server
//!
//! Routes intent requests from requesting to handling applications:
//! - Request state and the work queues
//! - The dispatcher state machine with disambiguation and timeouts
//! - A tokio task and cloneable handle serializing all access

mod actor;
pub mod config;
pub mod dispatcher;
pub mod handle;
pub mod protocol;
pub mod queue;
pub mod request;

pub use config::IntentServerConfig;
pub use dispatcher::{IntentServer, ServerMetrics};
pub use handle::{spawn_intent_server, IntentServerHandle};
pub use protocol::{DisambiguationRequest, ScheduledEvent, WaitStage};
pub use queue::QueueKind;
pub use request::{IntentRequest, RequestOutcome, RequestState};
