//! Message-passing system interface.
//!
//! Hosts that already run their own event loop can use
//! [`ChannelSystemInterface`]: presence and capabilities are pushed into it,
//! and every outgoing call becomes a [`SystemCommand`] on an mpsc channel.

use crate::server::request::IntentRequest;
use crate::system::interface::{ClientChannel, SystemInterface};
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::warn;

/// Work the host has to carry out on behalf of the intent server.
#[derive(Clone, Debug)]
pub enum SystemCommand {
    /// Start the application; report back with `notify_application_started`
    StartApplication { application_id: String },
    /// Send the request to its handler; report back with `notify_reply`
    DeliverRequest {
        channel: ClientChannel,
        request: IntentRequest,
    },
    /// Send the finished request back to its requester
    DeliverReply {
        channel: ClientChannel,
        request: IntentRequest,
    },
}

/// Presence of one application as seen by the host.
#[derive(Clone, Debug, Default)]
struct Presence {
    running: bool,
    channel: Option<ClientChannel>,
}

/// System interface backed by host-pushed state and an outgoing command channel.
pub struct ChannelSystemInterface {
    presence: RwLock<HashMap<String, Presence>>,
    capabilities: RwLock<HashMap<String, BTreeSet<String>>>,
    commands: mpsc::UnboundedSender<SystemCommand>,
}

impl ChannelSystemInterface {
    /// Create the adapter and the receiver the host consumes commands from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SystemCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (
            Self {
                presence: RwLock::new(HashMap::new()),
                capabilities: RwLock::new(HashMap::new()),
                commands,
            },
            rx,
        )
    }

    /// Mark an application as running, optionally with an IPC channel.
    pub fn set_running(&self, application_id: &str, channel: Option<ClientChannel>) {
        self.write_presence().insert(
            application_id.to_string(),
            Presence {
                running: true,
                channel,
            },
        );
    }

    /// Mark an application as stopped.
    pub fn set_stopped(&self, application_id: &str) {
        self.write_presence().remove(application_id);
    }

    /// Grant capabilities to an application.
    pub fn grant_capabilities<I, S>(&self, application_id: &str, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_capabilities()
            .entry(application_id.to_string())
            .or_default()
            .extend(capabilities.into_iter().map(Into::into));
    }

    /// Revoke every capability of an application.
    pub fn revoke_capabilities(&self, application_id: &str) {
        self.write_capabilities().remove(application_id);
    }

    // Poisoned maps are recovered and kept in use.
    fn read_presence(&self) -> RwLockReadGuard<'_, HashMap<String, Presence>> {
        self.presence.read().unwrap_or_else(|poisoned| {
            warn!("Presence map lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write_presence(&self) -> RwLockWriteGuard<'_, HashMap<String, Presence>> {
        self.presence.write().unwrap_or_else(|poisoned| {
            warn!("Presence map lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn read_capabilities(&self) -> RwLockReadGuard<'_, HashMap<String, BTreeSet<String>>> {
        self.capabilities.read().unwrap_or_else(|poisoned| {
            warn!("Capability map lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write_capabilities(&self) -> RwLockWriteGuard<'_, HashMap<String, BTreeSet<String>>> {
        self.capabilities.write().unwrap_or_else(|poisoned| {
            warn!("Capability map lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn send(&self, command: SystemCommand) {
        if self.commands.send(command).is_err() {
            warn!("System command receiver dropped, discarding command");
        }
    }
}

impl SystemInterface for ChannelSystemInterface {
    fn is_application_reachable(&self, application_id: &str) -> bool {
        self.read_presence()
            .get(application_id)
            .is_some_and(|p| p.running)
    }

    fn start_application(&self, application_id: &str) {
        self.send(SystemCommand::StartApplication {
            application_id: application_id.to_string(),
        });
    }

    fn find_channel(&self, application_id: &str) -> Option<ClientChannel> {
        self.read_presence()
            .get(application_id)
            .filter(|p| p.running)
            .and_then(|p| p.channel.clone())
    }

    fn deliver_request(&self, channel: &ClientChannel, request: &IntentRequest) {
        self.send(SystemCommand::DeliverRequest {
            channel: channel.clone(),
            request: request.clone(),
        });
    }

    fn deliver_reply(&self, channel: &ClientChannel, request: &IntentRequest) {
        self.send(SystemCommand::DeliverReply {
            channel: channel.clone(),
            request: request.clone(),
        });
    }

    fn application_capabilities(&self, application_id: &str) -> BTreeSet<String> {
        self.read_capabilities()
            .get(application_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence() {
        let (system, _rx) = ChannelSystemInterface::new();
        assert!(!system.is_application_reachable("a"));

        system.set_running("a", None);
        assert!(system.is_application_reachable("a"));
        assert!(system.find_channel("a").is_none());

        let channel = ClientChannel::new("a", "conn-1");
        system.set_running("a", Some(channel.clone()));
        assert_eq!(system.find_channel("a"), Some(channel));

        system.set_stopped("a");
        assert!(!system.is_application_reachable("a"));
        assert!(system.find_channel("a").is_none());
    }

    #[test]
    fn test_capabilities() {
        let (system, _rx) = ChannelSystemInterface::new();
        assert!(system.application_capabilities("a").is_empty());

        system.grant_capabilities("a", ["camera", "location"]);
        system.grant_capabilities("a", ["camera"]);
        assert_eq!(system.application_capabilities("a").len(), 2);

        system.revoke_capabilities("a");
        assert!(system.application_capabilities("a").is_empty());
    }

    #[test]
    fn test_start_application_emits_command() {
        let (system, mut rx) = ChannelSystemInterface::new();
        system.start_application("a");

        match rx.try_recv().unwrap() {
            SystemCommand::StartApplication { application_id } => {
                assert_eq!(application_id, "a")
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_poisoned_locks_keep_working() {
        let (system, _rx) = ChannelSystemInterface::new();
        std::thread::scope(|s| {
            let presence = s.spawn(|| {
                let _guard = system.presence.write().unwrap();
                panic!("host thread died while updating presence");
            });
            assert!(presence.join().is_err());
            let capabilities = s.spawn(|| {
                let _guard = system.capabilities.write().unwrap();
                panic!("host thread died while granting capabilities");
            });
            assert!(capabilities.join().is_err());
        });
        assert!(system.presence.is_poisoned());
        assert!(system.capabilities.is_poisoned());

        system.set_running("a", Some(ClientChannel::new("a", "conn-1")));
        assert!(system.is_application_reachable("a"));
        assert!(system.find_channel("a").is_some());

        system.grant_capabilities("a", ["camera"]);
        assert!(system.application_capabilities("a").contains("camera"));

        system.set_stopped("a");
        system.revoke_capabilities("a");
        assert!(!system.is_application_reachable("a"));
        assert!(system.application_capabilities("a").is_empty());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (system, rx) = ChannelSystemInterface::new();
        drop(rx);
        system.start_application("a");
    }
}
