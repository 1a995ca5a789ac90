//! Intent request dispatcher.
//!
//! [`IntentServer`] owns the registry and every in-flight request and moves
//! requests through their states. It is strictly single-threaded: all calls
//! must come from one serialized context, and the server reschedules itself
//! by posting [`ScheduledEvent`]s to the channel it was created with rather
//! than recursing. [`spawn_intent_server`](crate::server::spawn_intent_server)
//! provides such a context on a tokio task.
//!
//! Request lifecycle:
//!
//! 1. `ReceivedRequest`: pick the handler, either automatically or by
//!    asking the disambiguation listener.
//! 2. `Disambiguated`: start the handler unless it is already reachable.
//! 3. `StartedApplication`: send the request to the handler.
//! 4. `ReceivedReplyFromApplication`: send the outcome to the requester and
//!    forget the request.
//!
//! Every wait is bounded by a timer. A timer that fires after its request has
//! moved on does nothing.

use crate::core::{Error, ParameterMap, RequestId, Result};
use crate::intents::{Intent, IntentRegistry};
use crate::server::config::{timeout_millis, IntentServerConfig};
use crate::server::protocol::{DisambiguationRequest, ScheduledEvent, WaitStage};
use crate::server::queue::{QueueKind, QueueSet};
use crate::server::request::{IntentRequest, RequestOutcome, RequestState};
use crate::system::SystemInterface;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Number of finished request ids remembered for diagnosing late replies.
const MAX_TRACKED_COMPLETED_REQUESTS: usize = 512;

const REJECTED_MESSAGE: &str = "Disambiguation was rejected";
const INVALID_SELECTION_MESSAGE: &str = "Failed to disambiguate";
const NO_CHANNEL_MESSAGE: &str = "No IPC channel to reach target application.";
const WRONG_REPLIER_MESSAGE: &str = "Request reply received from wrong application";
const HANDLER_ERROR_MESSAGE: &str = "Handler application reported an error";

/// Dispatcher counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub submitted_requests: u64,
    pub rejected_requests: u64,
    pub succeeded_requests: u64,
    pub failed_requests: u64,
    /// Outcomes dropped because the requester had no channel
    pub undeliverable_replies: u64,
}

/// The intent registry and request routing engine.
pub struct IntentServer {
    registry: IntentRegistry,
    system: Arc<dyn SystemInterface>,
    config: IntentServerConfig,
    requests: HashMap<RequestId, IntentRequest>,
    queues: QueueSet,
    disambiguation: Option<mpsc::UnboundedSender<DisambiguationRequest>>,
    scheduler: mpsc::UnboundedSender<ScheduledEvent>,
    runtime: Handle,
    completed: HashSet<RequestId>,
    completed_order: VecDeque<RequestId>,
    metrics: ServerMetrics,
}

impl IntentServer {
    /// Create a server.
    ///
    /// Every [`ScheduledEvent`] posted to `scheduler` must eventually be fed
    /// back into [`IntentServer::handle_scheduled`]. Must be called within a
    /// tokio runtime; wait timers are spawned on it.
    pub fn new(
        config: IntentServerConfig,
        system: Arc<dyn SystemInterface>,
        scheduler: mpsc::UnboundedSender<ScheduledEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
        Ok(Self {
            registry: IntentRegistry::new(),
            system,
            config,
            requests: HashMap::new(),
            queues: QueueSet::new(),
            disambiguation: None,
            scheduler,
            runtime,
            completed: HashSet::new(),
            completed_order: VecDeque::new(),
            metrics: ServerMetrics::default(),
        })
    }

    /// The intent registry.
    pub fn registry(&self) -> &IntentRegistry {
        &self.registry
    }

    /// Mutable access to the intent registry.
    pub fn registry_mut(&mut self) -> &mut IntentRegistry {
        &mut self.registry
    }

    /// Current configuration, including timeout changes.
    pub fn config(&self) -> &IntentServerConfig {
        &self.config
    }

    /// Dispatcher counters.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// An in-flight request.
    pub fn request(&self, request_id: RequestId) -> Option<&IntentRequest> {
        self.requests.get(&request_id)
    }

    /// Number of in-flight requests.
    pub fn pending_request_count(&self) -> usize {
        self.requests.len()
    }

    /// Queue currently holding a request.
    pub fn request_queue(&self, request_id: RequestId) -> Option<QueueKind> {
        self.queues.location(request_id)
    }

    /// Set the disambiguation timeout for requests armed from now on.
    pub fn set_disambiguation_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.disambiguation_timeout_ms = timeout_millis("disambiguation timeout", timeout)?;
        Ok(())
    }

    /// Set the handler start timeout for requests armed from now on.
    pub fn set_start_application_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.start_application_timeout_ms =
            timeout_millis("start application timeout", timeout)?;
        Ok(())
    }

    /// Set the handler reply timeout for requests armed from now on.
    pub fn set_reply_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.reply_timeout_ms = timeout_millis("reply timeout", timeout)?;
        Ok(())
    }

    pub(crate) fn set_timeout(&mut self, stage: WaitStage, timeout: Duration) -> Result<()> {
        match stage {
            WaitStage::Disambiguation => self.set_disambiguation_timeout(timeout),
            WaitStage::ApplicationStart => self.set_start_application_timeout(timeout),
            WaitStage::Reply => self.set_reply_timeout(timeout),
        }
    }

    fn timeout_ms(&self, stage: WaitStage) -> u64 {
        match stage {
            WaitStage::Disambiguation => self.config.disambiguation_timeout_ms,
            WaitStage::ApplicationStart => self.config.start_application_timeout_ms,
            WaitStage::Reply => self.config.reply_timeout_ms,
        }
    }

    /// Attach a disambiguation listener, replacing any previous one.
    ///
    /// While the receiver is alive, every new request is offered to it.
    /// Dropping it switches back to picking the first candidate.
    pub fn subscribe_disambiguation(&mut self) -> mpsc::UnboundedReceiver<DisambiguationRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.disambiguation = Some(tx);
        rx
    }

    /// Whether a live disambiguation listener is attached.
    pub fn has_disambiguation_listener(&self) -> bool {
        self.disambiguation
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Admit a new intent request.
    ///
    /// With `application_id` the request targets that application's intent
    /// only; otherwise every intent with a matching id and parameters is a
    /// candidate. The returned snapshot identifies the request; its outcome
    /// is delivered later through [`SystemInterface::deliver_reply`].
    pub fn submit(
        &mut self,
        requesting_application_id: &str,
        intent_id: &str,
        application_id: Option<&str>,
        parameters: ParameterMap,
    ) -> Result<IntentRequest> {
        debug!(
            intent_id,
            requester = requesting_application_id,
            target = application_id.unwrap_or(""),
            "Incoming intent request"
        );

        match self.admit(requesting_application_id, intent_id, application_id, parameters) {
            Ok(request) => {
                self.metrics.submitted_requests += 1;
                let snapshot = request.clone();
                let id = request.id();
                self.requests.insert(id, request);
                self.enqueue_request(id);
                Ok(snapshot)
            }
            Err(err) => {
                warn!(%err, "Rejected intent request");
                self.metrics.rejected_requests += 1;
                Err(err)
            }
        }
    }

    fn admit(
        &self,
        requesting_application_id: &str,
        intent_id: &str,
        application_id: Option<&str>,
        parameters: ParameterMap,
    ) -> Result<IntentRequest> {
        if !self.system.is_application_reachable(requesting_application_id) {
            return Err(Error::UnknownRequester {
                intent_id: intent_id.to_string(),
                application_id: requesting_application_id.to_string(),
            });
        }

        let candidates: Vec<Intent> = match application_id.filter(|id| !id.is_empty()) {
            Some(target) => self
                .registry
                .find(intent_id, target, &parameters)
                .cloned()
                .into_iter()
                .collect(),
            None => IntentRegistry::filter_by_intent_id(self.registry.all(), intent_id, &parameters),
        };
        if candidates.is_empty() {
            return Err(Error::UnknownIntent {
                intent_id: intent_id.to_string(),
                application_id: requesting_application_id.to_string(),
            });
        }

        let visible = IntentRegistry::filter_by_requesting_application_id(
            &candidates,
            requesting_application_id,
            &*self.system,
        );
        if visible.is_empty() {
            return Err(Error::InaccessibleIntent {
                intent_id: intent_id.to_string(),
                application_id: requesting_application_id.to_string(),
            });
        }

        Ok(IntentRequest::new(
            requesting_application_id,
            intent_id,
            visible,
            parameters,
        ))
    }

    /// Feed back an event previously posted to the scheduler.
    pub fn handle_scheduled(&mut self, event: ScheduledEvent) {
        match event {
            ScheduledEvent::ProcessQueue => self.process_request_queue(),
            ScheduledEvent::Timeout {
                stage,
                request_id,
                timeout_ms,
            } => self.handle_timeout(stage, request_id, timeout_ms),
        }
    }

    fn trigger_request_queue(&self) {
        if self.scheduler.send(ScheduledEvent::ProcessQueue).is_err() {
            warn!("Scheduler channel closed, request queue will not be processed");
        }
    }

    fn enqueue_request(&mut self, request_id: RequestId) {
        if let Some(request) = self.requests.get(&request_id) {
            debug!(%request_id, state = %request.state(), "Enqueueing intent request");
        }
        if !self.queues.enqueue(QueueKind::Main, request_id) {
            warn!(%request_id, "Intent request is already queued");
        }
        self.trigger_request_queue();
    }

    fn arm_timer(&self, stage: WaitStage, request_id: RequestId) {
        let timeout_ms = self.timeout_ms(stage);
        let scheduler = self.scheduler.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = scheduler.send(ScheduledEvent::Timeout {
                stage,
                request_id,
                timeout_ms,
            });
        });
    }

    /// Run one step: take the next request off the main queue and advance
    /// it as far as it can go without waiting.
    pub fn process_request_queue(&mut self) {
        let Some(request_id) = self.queues.pop_main() else {
            return;
        };
        let Some(mut request) = self.requests.remove(&request_id) else {
            warn!(%request_id, "Queued intent request is unknown");
            self.trigger_request_queue();
            return;
        };

        debug!(%request_id, state = %request.state(), "Processing intent request");

        if request.state() == RequestState::ReceivedRequest {
            self.disambiguate(&mut request);
        }
        if request.state() == RequestState::Disambiguated {
            self.start_handler(&mut request);
        }
        if request.state() == RequestState::StartedApplication {
            self.send_to_handler(&mut request);
        }
        if request.state() == RequestState::ReceivedReplyFromApplication {
            self.deliver_reply(request);
        } else {
            self.requests.insert(request_id, request);
        }

        self.trigger_request_queue();
    }

    fn disambiguate(&mut self, request: &mut IntentRequest) {
        let request_id = request.id();

        if request.handling_application_id().is_none() {
            if self.offer_to_listener(request) {
                self.queues.enqueue(QueueKind::Disambiguation, request_id);
                request.set_state(RequestState::WaitingForDisambiguation);
                debug!(%request_id, intent_id = request.intent_id(), "Waiting for disambiguation");
                self.arm_timer(WaitStage::Disambiguation, request_id);
                return;
            }
            if let Some(first) = request.potential_intents().first() {
                let handler = first.application_id.clone();
                request.set_handling_application_id(&handler);
            }
        }

        if request.handling_application_id().is_some() {
            debug!(%request_id, "No disambiguation necessary");
            request.set_state(RequestState::Disambiguated);
        }
    }

    /// Send the candidates to the listener. False if nobody is listening,
    /// in which case the listener is detached.
    fn offer_to_listener(&mut self, request: &IntentRequest) -> bool {
        let Some(listener) = &self.disambiguation else {
            return false;
        };
        let notification = DisambiguationRequest {
            request_id: request.id(),
            potential_intents: request.potential_intents().to_vec(),
            parameters: request.parameters().clone(),
        };
        if listener.send(notification).is_ok() {
            return true;
        }
        debug!(request_id = %request.id(), "Disambiguation listener went away, selecting automatically");
        self.disambiguation = None;
        false
    }

    fn start_handler(&mut self, request: &mut IntentRequest) {
        let request_id = request.id();
        let Some(handler) = request.handling_application_id().map(str::to_string) else {
            request.set_request_failed(INVALID_SELECTION_MESSAGE);
            return;
        };

        if self.system.is_application_reachable(&handler) {
            debug!(%request_id, handler = %handler, "Intent handler is already running");
            request.set_state(RequestState::StartedApplication);
            return;
        }

        debug!(%request_id, handler = %handler, "Intent handler is not running");
        self.queues.enqueue(QueueKind::StartingApplication, request_id);
        request.set_state(RequestState::WaitingForApplicationStart);
        self.arm_timer(WaitStage::ApplicationStart, request_id);
        self.system.start_application(&handler);
    }

    fn send_to_handler(&mut self, request: &mut IntentRequest) {
        let request_id = request.id();
        let handler = request.handling_application_id().unwrap_or_default().to_string();

        let Some(channel) = self.system.find_channel(&handler) else {
            warn!(%request_id, handler = %handler, "No IPC channel to forward the intent request");
            request.set_request_failed(NO_CHANNEL_MESSAGE);
            return;
        };

        debug!(%request_id, handler = %handler, "Sending intent request to handler application");
        self.queues.enqueue(QueueKind::SentToApplication, request_id);
        request.set_state(RequestState::WaitingForReplyFromApplication);
        self.arm_timer(WaitStage::Reply, request_id);
        self.system.deliver_request(&channel, request);
    }

    fn deliver_reply(&mut self, request: IntentRequest) {
        let request_id = request.id();
        let requester = request.requesting_application_id();

        match request.result() {
            Some(RequestOutcome::Succeeded(_)) => self.metrics.succeeded_requests += 1,
            _ => self.metrics.failed_requests += 1,
        }

        match self.system.find_channel(requester) {
            Some(channel) => {
                debug!(%request_id, requester, "Forwarding intent reply to requesting application");
                self.system.deliver_reply(&channel, &request);
            }
            None => {
                warn!(%request_id, requester, "No IPC channel to forward the intent reply");
                self.metrics.undeliverable_replies += 1;
            }
        }

        self.remember_completed(request_id);
    }

    fn remember_completed(&mut self, request_id: RequestId) {
        if self.completed.insert(request_id) {
            self.completed_order.push_back(request_id);
        }
        while self.completed_order.len() > MAX_TRACKED_COMPLETED_REQUESTS {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }

    /// Fail a request that was just taken off a wait queue and route it to
    /// delivery.
    fn fail_request(&mut self, request_id: RequestId, message: impl Into<String>) {
        if let Some(request) = self.requests.get_mut(&request_id) {
            request.set_request_failed(message);
            self.enqueue_request(request_id);
        }
    }

    fn handle_timeout(&mut self, stage: WaitStage, request_id: RequestId, timeout_ms: u64) {
        if !self.queues.remove(stage.queue(), request_id) {
            trace!(%request_id, ?stage, "Timer fired after the request moved on");
            return;
        }
        let message = stage.timeout_message(timeout_ms);
        warn!(%request_id, ?stage, "{message}");
        self.fail_request(request_id, message);
    }

    /// Accept the listener's choice of handler for a pending request.
    ///
    /// Choosing an intent that was not offered fails the request.
    pub fn resolve_disambiguation(&mut self, request_id: RequestId, selected: &Intent) -> Result<()> {
        if !self.queues.remove(QueueKind::Disambiguation, request_id) {
            warn!(%request_id, "Got a disambiguation acknowledge but no disambiguation was expected");
            return Err(Error::RequestNotPending(request_id));
        }
        let Some(request) = self.requests.get_mut(&request_id) else {
            return Err(Error::RequestNotPending(request_id));
        };

        if request.potential_intents().contains(selected) {
            request.set_handling_application_id(&selected.application_id);
            request.set_state(RequestState::Disambiguated);
            self.enqueue_request(request_id);
        } else {
            warn!(
                %request_id,
                intent = %selected,
                "Disambiguated to an intent that was not a candidate"
            );
            self.fail_request(request_id, INVALID_SELECTION_MESSAGE);
        }
        Ok(())
    }

    /// Reject a pending request on behalf of the listener.
    pub fn reject_disambiguation(&mut self, request_id: RequestId) -> Result<()> {
        if !self.queues.remove(QueueKind::Disambiguation, request_id) {
            warn!(%request_id, "Got a disambiguation reject but no disambiguation was expected");
            return Err(Error::RequestNotPending(request_id));
        }
        self.fail_request(request_id, REJECTED_MESSAGE);
        Ok(())
    }

    /// Release every request waiting for `application_id` to start.
    ///
    /// Returns the number of requests released.
    pub fn application_started(&mut self, application_id: &str) -> usize {
        let requests = &self.requests;
        let released = self.queues.take_where(QueueKind::StartingApplication, |id| {
            requests
                .get(id)
                .and_then(IntentRequest::handling_application_id)
                == Some(application_id)
        });

        for request_id in &released {
            if let Some(request) = self.requests.get_mut(request_id) {
                debug!(%request_id, application_id, "Intent request can now be forwarded");
                request.set_state(RequestState::StartedApplication);
                self.queues.enqueue(QueueKind::Main, *request_id);
            }
        }
        if !released.is_empty() {
            self.trigger_request_queue();
        }
        released.len()
    }

    /// Record the handler's reply to a request.
    ///
    /// With `is_error` the failure message is taken from the payload's
    /// `errorMessage` entry.
    pub fn reply_from_application(
        &mut self,
        replying_application_id: &str,
        request_id: RequestId,
        is_error: bool,
        payload: ParameterMap,
    ) -> Result<()> {
        if !self.queues.remove(QueueKind::SentToApplication, request_id) {
            if self.completed.contains(&request_id) {
                debug!(
                    %request_id,
                    replying_application_id,
                    "Ignoring late reply for an already completed intent request"
                );
            } else {
                warn!(
                    %request_id,
                    replying_application_id,
                    "Got a reply but no reply was expected for this intent request"
                );
            }
            return Err(Error::RequestNotPending(request_id));
        }
        let Some(request) = self.requests.get_mut(&request_id) else {
            return Err(Error::RequestNotPending(request_id));
        };

        if request.handling_application_id() != Some(replying_application_id) {
            warn!(
                %request_id,
                replying_application_id,
                expected = request.handling_application_id().unwrap_or(""),
                "Got a reply from the wrong application"
            );
            request.set_request_failed(WRONG_REPLIER_MESSAGE);
        } else if is_error {
            let message = payload
                .get("errorMessage")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(HANDLER_ERROR_MESSAGE)
                .to_string();
            debug!(%request_id, replying_application_id, error = %message, "Got an error reply");
            request.set_request_failed(message);
        } else {
            debug!(%request_id, replying_application_id, "Got a reply");
            request.set_request_succeeded(payload);
        }

        self.enqueue_request(request_id);
        Ok(())
    }
}
