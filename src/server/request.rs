//! Intent request representation.

use crate::core::{new_request_id, now, ParameterMap, RequestId, Timestamp};
use crate::intents::Intent;
use serde::{Deserialize, Serialize};

/// Processing state of an intent request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// Just submitted
    ReceivedRequest,
    /// Waiting for the disambiguation listener
    WaitingForDisambiguation,
    /// Handling application is known
    Disambiguated,
    /// Waiting for the handling application to start
    WaitingForApplicationStart,
    /// Handling application is running
    StartedApplication,
    /// Sent to the handling application
    WaitingForReplyFromApplication,
    /// Outcome is known and ready to be delivered
    ReceivedReplyFromApplication,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestState::ReceivedRequest => "ReceivedRequest",
            RequestState::WaitingForDisambiguation => "WaitingForDisambiguation",
            RequestState::Disambiguated => "Disambiguated",
            RequestState::WaitingForApplicationStart => "WaitingForApplicationStart",
            RequestState::StartedApplication => "StartedApplication",
            RequestState::WaitingForReplyFromApplication => "WaitingForReplyFromApplication",
            RequestState::ReceivedReplyFromApplication => "ReceivedReplyFromApplication",
        };
        write!(f, "{name}")
    }
}

/// Final outcome of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RequestOutcome {
    /// The handler replied with a result payload
    Succeeded(ParameterMap),
    /// The request failed; the message explains why
    Failed(String),
}

impl RequestOutcome {
    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Succeeded(_))
    }
}

/// One in-flight intent request.
///
/// Caller-supplied fields are immutable. The handling application is set at
/// most once, and the outcome is set exactly once before delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentRequest {
    id: RequestId,
    requesting_application_id: String,
    intent_id: String,
    parameters: ParameterMap,
    potential_intents: Vec<Intent>,
    handling_application_id: Option<String>,
    state: RequestState,
    result: Option<RequestOutcome>,
    created: Timestamp,
}

impl IntentRequest {
    /// Create a request. `potential_intents` must not be empty.
    pub(crate) fn new(
        requesting_application_id: &str,
        intent_id: &str,
        potential_intents: Vec<Intent>,
        parameters: ParameterMap,
    ) -> Self {
        debug_assert!(!potential_intents.is_empty());
        Self {
            id: new_request_id(),
            requesting_application_id: requesting_application_id.to_string(),
            intent_id: intent_id.to_string(),
            parameters,
            potential_intents,
            handling_application_id: None,
            state: RequestState::ReceivedRequest,
            result: None,
            created: now(),
        }
    }

    /// Get request ID.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Application that submitted the request.
    pub fn requesting_application_id(&self) -> &str {
        &self.requesting_application_id
    }

    /// Requested intent ID.
    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    /// Parameters supplied by the requester.
    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    /// Candidate intents visible to the requester, in registry order.
    pub fn potential_intents(&self) -> &[Intent] {
        &self.potential_intents
    }

    /// Application chosen to handle the request, if any yet.
    pub fn handling_application_id(&self) -> Option<&str> {
        self.handling_application_id.as_deref()
    }

    /// The candidate chosen to handle this request, once disambiguated.
    pub fn handling_intent(&self) -> Option<&Intent> {
        let handler = self.handling_application_id.as_deref()?;
        self.potential_intents
            .iter()
            .find(|i| i.application_id == handler)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Outcome, once the request has finished.
    pub fn result(&self) -> Option<&RequestOutcome> {
        self.result.as_ref()
    }

    /// Submission time.
    pub fn created(&self) -> Timestamp {
        self.created
    }

    /// Set the handling application. Has no effect once one is set.
    pub(crate) fn set_handling_application_id(&mut self, application_id: &str) -> bool {
        if self.handling_application_id.is_some() {
            return false;
        }
        self.handling_application_id = Some(application_id.to_string());
        true
    }

    pub(crate) fn set_state(&mut self, state: RequestState) {
        self.state = state;
    }

    /// Record a failure and route the request to delivery.
    pub(crate) fn set_request_failed(&mut self, message: impl Into<String>) {
        self.finish(RequestOutcome::Failed(message.into()));
    }

    /// Record a successful reply and route the request to delivery.
    pub(crate) fn set_request_succeeded(&mut self, payload: ParameterMap) {
        self.finish(RequestOutcome::Succeeded(payload));
    }

    fn finish(&mut self, outcome: RequestOutcome) {
        debug_assert!(self.result.is_none(), "request outcome set twice");
        if self.result.is_none() {
            self.result = Some(outcome);
        }
        self.state = RequestState::ReceivedReplyFromApplication;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> IntentRequest {
        IntentRequest::new(
            "requester",
            "open",
            vec![Intent::new("open", "a"), Intent::new("open", "b")],
            ParameterMap::new(),
        )
    }

    #[test]
    fn test_request_creation() {
        let req = request();
        assert_eq!(req.state(), RequestState::ReceivedRequest);
        assert_eq!(req.requesting_application_id(), "requester");
        assert_eq!(req.intent_id(), "open");
        assert_eq!(req.potential_intents().len(), 2);
        assert!(req.handling_application_id().is_none());
        assert!(req.result().is_none());
        assert_ne!(req.id(), request().id());
    }

    #[test]
    fn test_handling_application_is_set_once() {
        let mut req = request();
        assert!(req.set_handling_application_id("b"));
        assert!(!req.set_handling_application_id("a"));
        assert_eq!(req.handling_application_id(), Some("b"));
        assert_eq!(req.handling_intent(), Some(&Intent::new("open", "b")));
    }

    #[test]
    fn test_failure_routes_to_delivery() {
        let mut req = request();
        req.set_state(RequestState::WaitingForDisambiguation);
        req.set_request_failed("Disambiguation was rejected");

        assert_eq!(req.state(), RequestState::ReceivedReplyFromApplication);
        assert_eq!(
            req.result(),
            Some(&RequestOutcome::Failed("Disambiguation was rejected".to_string()))
        );
    }

    #[test]
    fn test_success() {
        let mut req = request();
        let mut payload = ParameterMap::new();
        payload.insert("answer".to_string(), json!(42));
        req.set_request_succeeded(payload.clone());

        assert_eq!(req.state(), RequestState::ReceivedReplyFromApplication);
        assert!(req.result().unwrap().is_success());
        assert_eq!(req.result(), Some(&RequestOutcome::Succeeded(payload)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            RequestState::WaitingForApplicationStart.to_string(),
            "WaitingForApplicationStart"
        );
    }
}
