//! Messages flowing into and out of the intent server task.

use crate::core::{ParameterMap, RequestId, Result};
use crate::intents::Intent;
use crate::server::dispatcher::ServerMetrics;
use crate::server::queue::QueueKind;
use crate::server::request::IntentRequest;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Emitted when a request needs an external decision on its handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisambiguationRequest {
    /// Request to disambiguate
    pub request_id: RequestId,
    /// Candidates, in registry order
    pub potential_intents: Vec<Intent>,
    /// Parameters of the request
    pub parameters: ParameterMap,
}

/// A stage in which a request waits on something external.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitStage {
    Disambiguation,
    ApplicationStart,
    Reply,
}

impl WaitStage {
    /// Queue holding requests in this stage.
    pub fn queue(self) -> QueueKind {
        match self {
            WaitStage::Disambiguation => QueueKind::Disambiguation,
            WaitStage::ApplicationStart => QueueKind::StartingApplication,
            WaitStage::Reply => QueueKind::SentToApplication,
        }
    }

    /// Failure message used when the stage times out.
    pub(crate) fn timeout_message(self, timeout_ms: u64) -> String {
        match self {
            WaitStage::Disambiguation => {
                format!("Disambiguation timed out after {timeout_ms} ms")
            }
            WaitStage::ApplicationStart => {
                format!("Starting handler application timed out after {timeout_ms} ms")
            }
            WaitStage::Reply => {
                format!("Waiting for reply from handler application timed out after {timeout_ms} ms")
            }
        }
    }
}

/// Deferred work the dispatcher posts to itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduledEvent {
    /// Run one iteration of the main queue
    ProcessQueue,
    /// A wait stage timer expired
    Timeout {
        stage: WaitStage,
        request_id: RequestId,
        /// Timeout the timer was armed with
        timeout_ms: u64,
    },
}

/// Calls from [`IntentServerHandle`](crate::server::IntentServerHandle) into the server task.
pub(crate) enum ServerCommand {
    RegisterApplication {
        application_id: String,
        reply: oneshot::Sender<bool>,
    },
    UnregisterApplication {
        application_id: String,
    },
    RegisterBackgroundHandler {
        application_id: String,
        handler_id: String,
        reply: oneshot::Sender<bool>,
    },
    UnregisterBackgroundHandler {
        application_id: String,
        handler_id: String,
    },
    AddIntent {
        intent: Intent,
        reply: oneshot::Sender<Result<Intent>>,
    },
    RemoveIntent {
        intent: Intent,
        reply: oneshot::Sender<Option<Intent>>,
    },
    FindIntent {
        intent_id: String,
        application_id: String,
        parameters: ParameterMap,
        reply: oneshot::Sender<Option<Intent>>,
    },
    ListIntents {
        reply: oneshot::Sender<Vec<Intent>>,
    },
    Submit {
        requesting_application_id: String,
        intent_id: String,
        application_id: Option<String>,
        parameters: ParameterMap,
        reply: oneshot::Sender<Result<IntentRequest>>,
    },
    SubscribeDisambiguation {
        reply: oneshot::Sender<mpsc::UnboundedReceiver<DisambiguationRequest>>,
    },
    ResolveDisambiguation {
        request_id: RequestId,
        selected: Intent,
        reply: oneshot::Sender<Result<()>>,
    },
    RejectDisambiguation {
        request_id: RequestId,
        reply: oneshot::Sender<Result<()>>,
    },
    ApplicationStarted {
        application_id: String,
    },
    Reply {
        application_id: String,
        request_id: RequestId,
        is_error: bool,
        payload: ParameterMap,
        reply: oneshot::Sender<Result<()>>,
    },
    SetTimeout {
        stage: WaitStage,
        timeout: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    Metrics {
        reply: oneshot::Sender<ServerMetrics>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_queues() {
        assert_eq!(WaitStage::Disambiguation.queue(), QueueKind::Disambiguation);
        assert_eq!(WaitStage::ApplicationStart.queue(), QueueKind::StartingApplication);
        assert_eq!(WaitStage::Reply.queue(), QueueKind::SentToApplication);
    }

    #[test]
    fn test_timeout_messages() {
        assert_eq!(
            WaitStage::Disambiguation.timeout_message(100),
            "Disambiguation timed out after 100 ms"
        );
        assert_eq!(
            WaitStage::ApplicationStart.timeout_message(3000),
            "Starting handler application timed out after 3000 ms"
        );
        assert_eq!(
            WaitStage::Reply.timeout_message(5000),
            "Waiting for reply from handler application timed out after 5000 ms"
        );
    }
}
