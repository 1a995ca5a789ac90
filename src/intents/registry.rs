//! Intent registry.
//!
//! Tracks known applications, their background handlers and the intents
//! they declare. Pure in-memory lookup; installation and removal are driven
//! by the host.

use crate::core::{Error, ParameterMap, Result};
use crate::intents::events::{RegistryEvent, RegistryEvents};
use crate::intents::intent::{Intent, IntentVisibility};
use crate::system::SystemInterface;
use std::collections::HashMap;
use tracing::debug;

/// Intent registry.
pub struct IntentRegistry {
    /// Known application IDs, in registration order
    applications: Vec<String>,
    /// Background handlers per application
    background_handlers: HashMap<String, Vec<String>>,
    /// Registered intents
    intents: Vec<Intent>,
    /// Change notifications
    events: RegistryEvents,
}

impl IntentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            applications: Vec::new(),
            background_handlers: HashMap::new(),
            intents: Vec::new(),
            events: RegistryEvents::default(),
        }
    }

    /// Registry change notifications.
    pub fn events(&self) -> &RegistryEvents {
        &self.events
    }

    /// Register an application. Returns false if it is already known.
    pub fn register_application(&mut self, application_id: &str) -> bool {
        if self.is_known_application(application_id) {
            return false;
        }
        self.applications.push(application_id.to_string());
        true
    }

    /// Unregister an application together with its background handlers.
    ///
    /// Intents owned by the application are left alone; removing them is up
    /// to the host.
    pub fn unregister_application(&mut self, application_id: &str) {
        self.background_handlers.remove(application_id);
        self.applications.retain(|id| id != application_id);
    }

    /// Whether an application is known.
    pub fn is_known_application(&self, application_id: &str) -> bool {
        self.applications.iter().any(|id| id == application_id)
    }

    /// All known application IDs.
    pub fn applications(&self) -> &[String] {
        &self.applications
    }

    /// Register a background handler for a known application.
    ///
    /// Returns false if the application is unknown or the handler is already
    /// registered.
    pub fn register_background_handler(&mut self, application_id: &str, handler_id: &str) -> bool {
        if !self.is_known_application(application_id) {
            return false;
        }
        let handlers = self
            .background_handlers
            .entry(application_id.to_string())
            .or_default();
        if handlers.iter().any(|h| h == handler_id) {
            return false;
        }
        handlers.push(handler_id.to_string());
        true
    }

    /// Unregister a background handler.
    pub fn unregister_background_handler(&mut self, application_id: &str, handler_id: &str) {
        if let Some(handlers) = self.background_handlers.get_mut(application_id) {
            handlers.retain(|h| h != handler_id);
        }
    }

    /// Background handlers of an application.
    pub fn background_handlers(&self, application_id: &str) -> &[String] {
        self.background_handlers
            .get(application_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn has_background_handler(&self, application_id: &str, handler_id: &str) -> bool {
        self.background_handlers(application_id)
            .iter()
            .any(|h| h == handler_id)
    }

    /// Register an intent.
    pub fn add_intent(&mut self, intent: Intent) -> Result<Intent> {
        if intent.intent_id.is_empty() {
            return Err(Error::InvalidIntent("intent id is empty".to_string()));
        }
        if !self.is_known_application(&intent.application_id) {
            return Err(Error::UnknownApplication(intent.application_id));
        }
        if self
            .intents
            .iter()
            .any(|i| i.is(&intent.intent_id, &intent.application_id))
        {
            return Err(Error::InvalidIntent(format!(
                "intent {} is already registered",
                intent
            )));
        }
        if let Some(handler) = &intent.background_handler_id {
            if !self.has_background_handler(&intent.application_id, handler) {
                return Err(Error::InvalidIntent(format!(
                    "background handler {} is not registered for application {}",
                    handler, intent.application_id
                )));
            }
        }

        debug!(intent = %intent, "Intent added");
        self.intents.push(intent.clone());
        self.events.publish(RegistryEvent::IntentAdded(intent.clone()));
        Ok(intent)
    }

    /// Remove an intent by its `(intent_id, application_id)` key.
    pub fn remove_intent(&mut self, intent: &Intent) -> Option<Intent> {
        let index = self
            .intents
            .iter()
            .position(|i| i.is(&intent.intent_id, &intent.application_id))?;
        let removed = self.intents.remove(index);
        debug!(intent = %removed, "Intent removed");
        self.events.publish(RegistryEvent::IntentRemoved(removed.clone()));
        Some(removed)
    }

    /// All registered intents.
    pub fn all(&self) -> &[Intent] {
        &self.intents
    }

    /// Get number of registered intents.
    pub fn intent_count(&self) -> usize {
        self.intents.len()
    }

    /// Find the intent with the given key whose parameter match accepts
    /// `parameters`.
    pub fn find(
        &self,
        intent_id: &str,
        application_id: &str,
        parameters: &ParameterMap,
    ) -> Option<&Intent> {
        self.intents
            .iter()
            .find(|i| i.is(intent_id, application_id) && i.check_parameter_match(parameters))
    }

    /// Intents with the given id accepting `parameters`.
    pub fn filter_by_intent_id(
        intents: &[Intent],
        intent_id: &str,
        parameters: &ParameterMap,
    ) -> Vec<Intent> {
        intents
            .iter()
            .filter(|i| i.intent_id == intent_id && i.check_parameter_match(parameters))
            .cloned()
            .collect()
    }

    /// Intents owned by `handling_application_id` accepting `parameters`.
    pub fn filter_by_handling_application_id(
        intents: &[Intent],
        handling_application_id: &str,
        parameters: &ParameterMap,
    ) -> Vec<Intent> {
        intents
            .iter()
            .filter(|i| {
                i.application_id == handling_application_id && i.check_parameter_match(parameters)
            })
            .cloned()
            .collect()
    }

    /// Intents visible to `requesting_application_id`.
    ///
    /// Owners always see their own intents. Anyone else only sees public
    /// intents whose required capabilities they hold.
    pub fn filter_by_requesting_application_id(
        intents: &[Intent],
        requesting_application_id: &str,
        system: &dyn SystemInterface,
    ) -> Vec<Intent> {
        let mut granted = None;

        intents
            .iter()
            .filter(|intent| {
                if intent.application_id == requesting_application_id {
                    return true;
                }
                if intent.visibility == IntentVisibility::Private {
                    debug!(intent = %intent, "Not considering intent due to private visibility");
                    return false;
                }
                if !intent.required_capabilities.is_empty() {
                    let granted = granted.get_or_insert_with(|| {
                        system.application_capabilities(requesting_application_id)
                    });
                    if !intent.capabilities_satisfied_by(granted) {
                        debug!(intent = %intent, "Not considering intent due to missing capabilities");
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect()
    }
}

impl Default for IntentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
