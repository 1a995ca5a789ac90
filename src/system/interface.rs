//! System interface definition.
//!
//! The intent server never talks to processes or IPC directly. Everything it
//! needs from the host goes through this trait.

use crate::server::request::IntentRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opaque handle to an application's IPC connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientChannel {
    /// Application the channel belongs to
    pub application_id: String,
    /// Host-specific connection identifier
    pub connection_id: String,
}

impl ClientChannel {
    /// Create a new channel handle.
    pub fn new(application_id: &str, connection_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            connection_id: connection_id.to_string(),
        }
    }
}

/// Host services consumed by the intent server.
///
/// Implementations must not block: starting applications and delivering
/// messages are fire-and-forget. Completion is reported back through
/// [`IntentServerHandle::notify_application_started`] and
/// [`IntentServerHandle::notify_reply`].
///
/// [`IntentServerHandle::notify_application_started`]: crate::server::IntentServerHandle::notify_application_started
/// [`IntentServerHandle::notify_reply`]: crate::server::IntentServerHandle::notify_reply
pub trait SystemInterface: Send + Sync {
    /// Whether the application is running and can be talked to.
    fn is_application_reachable(&self, application_id: &str) -> bool;

    /// Ask the host to start an application.
    fn start_application(&self, application_id: &str);

    /// Look up the IPC channel of a running application.
    fn find_channel(&self, application_id: &str) -> Option<ClientChannel>;

    /// Forward a request to its handling application.
    fn deliver_request(&self, channel: &ClientChannel, request: &IntentRequest);

    /// Forward the outcome of a request to its requesting application.
    fn deliver_reply(&self, channel: &ClientChannel, request: &IntentRequest);

    /// Capabilities granted to an application.
    fn application_capabilities(&self, application_id: &str) -> BTreeSet<String>;
}
