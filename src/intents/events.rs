//! Registry change notifications.

use crate::intents::intent::Intent;
use tokio::sync::broadcast;

/// Change to the set of registered intents.
#[derive(Clone, Debug, PartialEq)]
pub enum RegistryEvent {
    /// An intent was registered
    IntentAdded(Intent),
    /// An intent was removed
    IntentRemoved(Intent),
    /// The intent list changed; follows every add or remove
    IntentListChanged,
}

/// Broadcast bus for registry events.
#[derive(Clone, Debug)]
pub struct RegistryEvents {
    sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryEvents {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    /// Publish an add/remove event followed by the derived list change.
    ///
    /// Having no subscribers is fine.
    pub(crate) fn publish(&self, event: RegistryEvent) {
        let _ = self.sender.send(event);
        let _ = self.sender.send(RegistryEvent::IntentListChanged);
    }
}

impl Default for RegistryEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_emits_list_changed() {
        let events = RegistryEvents::default();
        let mut rx = events.subscribe();

        let intent = Intent::new("open", "a");
        events.publish(RegistryEvent::IntentAdded(intent.clone()));

        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::IntentAdded(intent));
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::IntentListChanged);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let events = RegistryEvents::default();
        events.publish(RegistryEvent::IntentRemoved(Intent::new("open", "a")));
    }
}
