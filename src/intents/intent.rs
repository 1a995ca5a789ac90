//! Intent declarations.
//!
//! An intent is a capability an application declares it can handle,
//! optionally restricted by visibility, required capabilities and
//! parameter matches.

use crate::core::ParameterMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Who may see an intent besides its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentVisibility {
    /// Visible to every application holding the required capabilities
    Public,
    /// Visible to the owning application only
    Private,
}

impl Default for IntentVisibility {
    fn default() -> Self {
        Self::Public
    }
}

impl std::fmt::Display for IntentVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentVisibility::Public => write!(f, "public"),
            IntentVisibility::Private => write!(f, "private"),
        }
    }
}

/// A registered intent.
///
/// Intents are identified by the pair `(intent_id, application_id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Intent name, shared by all applications handling it
    pub intent_id: String,
    /// Owning application
    pub application_id: String,
    /// Background handler of the owning application, if any
    pub background_handler_id: Option<String>,
    /// Capabilities a foreign requester must hold
    pub required_capabilities: BTreeSet<String>,
    /// Visibility to other applications
    pub visibility: IntentVisibility,
    /// Parameter values a request must carry
    pub parameter_match: ParameterMap,
}

impl Intent {
    /// Create a new public intent without restrictions.
    pub fn new(intent_id: &str, application_id: &str) -> Self {
        Self {
            intent_id: intent_id.to_string(),
            application_id: application_id.to_string(),
            background_handler_id: None,
            required_capabilities: BTreeSet::new(),
            visibility: IntentVisibility::Public,
            parameter_match: ParameterMap::new(),
        }
    }

    /// Route requests to a background handler instead of the application.
    pub fn with_background_handler(mut self, handler_id: &str) -> Self {
        self.background_handler_id = Some(handler_id.to_string());
        self
    }

    /// Require a capability from foreign requesters.
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.required_capabilities.insert(capability.to_string());
        self
    }

    /// Set visibility.
    pub fn with_visibility(mut self, visibility: IntentVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Constrain a request parameter to an exact value.
    pub fn with_parameter_match(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameter_match.insert(key.to_string(), value);
        self
    }

    /// Whether this intent has the given identity key.
    pub fn is(&self, intent_id: &str, application_id: &str) -> bool {
        self.intent_id == intent_id && self.application_id == application_id
    }

    /// Check request parameters against the parameter match.
    ///
    /// Every constrained key must be present with an equal value. Keys the
    /// intent does not constrain are ignored.
    pub fn check_parameter_match(&self, parameters: &ParameterMap) -> bool {
        self.parameter_match
            .iter()
            .all(|(key, expected)| parameters.get(key) == Some(expected))
    }

    /// Whether `granted` covers every required capability.
    pub fn capabilities_satisfied_by(&self, granted: &BTreeSet<String>) -> bool {
        self.required_capabilities.is_subset(granted)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.intent_id, self.application_id)
    }
}
