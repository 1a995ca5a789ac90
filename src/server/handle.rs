//! Host-facing handle to a running intent server.

use crate::core::{Error, ParameterMap, RequestId, Result};
use crate::intents::{Intent, RegistryEvent, RegistryEvents};
use crate::server::actor::IntentServerActor;
use crate::server::config::IntentServerConfig;
use crate::server::dispatcher::{IntentServer, ServerMetrics};
use crate::server::protocol::{DisambiguationRequest, ServerCommand, WaitStage};
use crate::server::request::IntentRequest;
use crate::system::SystemInterface;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Cloneable handle to an intent server task.
///
/// The task stops once every handle has been dropped.
#[derive(Clone)]
pub struct IntentServerHandle {
    commands: mpsc::UnboundedSender<ServerCommand>,
    registry_events: RegistryEvents,
}

/// Start an intent server on the current tokio runtime.
///
/// Fails with [`Error::NoRuntime`] outside a runtime.
pub fn spawn_intent_server(
    config: IntentServerConfig,
    system: Arc<dyn SystemInterface>,
) -> Result<IntentServerHandle> {
    let (scheduler, scheduled) = mpsc::unbounded_channel();
    let (commands, command_rx) = mpsc::unbounded_channel();

    let server = IntentServer::new(config, system, scheduler)?;
    let registry_events = server.registry().events().clone();
    let actor = IntentServerActor::new(server, command_rx, scheduled);

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(IntentServerHandle {
        commands,
        registry_events,
    })
}

impl IntentServerHandle {
    fn post(&self, command: ServerCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ServerStopped)
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ServerCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.post(build(reply))?;
        rx.await.map_err(|_| Error::ServerStopped)
    }

    /// Whether the server task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Subscribe to intent added/removed notifications.
    pub fn subscribe_registry_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry_events.subscribe()
    }

    /// Register an application. Returns false if it is already known.
    pub async fn register_application(&self, application_id: &str) -> Result<bool> {
        let application_id = application_id.to_string();
        self.call(|reply| ServerCommand::RegisterApplication {
            application_id,
            reply,
        })
        .await
    }

    /// Unregister an application and its background handlers.
    pub fn unregister_application(&self, application_id: &str) -> Result<()> {
        self.post(ServerCommand::UnregisterApplication {
            application_id: application_id.to_string(),
        })
    }

    /// Register a background handler for a known application.
    pub async fn register_background_handler(
        &self,
        application_id: &str,
        handler_id: &str,
    ) -> Result<bool> {
        let application_id = application_id.to_string();
        let handler_id = handler_id.to_string();
        self.call(|reply| ServerCommand::RegisterBackgroundHandler {
            application_id,
            handler_id,
            reply,
        })
        .await
    }

    /// Unregister a background handler.
    pub fn unregister_background_handler(&self, application_id: &str, handler_id: &str) -> Result<()> {
        self.post(ServerCommand::UnregisterBackgroundHandler {
            application_id: application_id.to_string(),
            handler_id: handler_id.to_string(),
        })
    }

    /// Register an intent.
    pub async fn add_intent(&self, intent: Intent) -> Result<Intent> {
        self.call(|reply| ServerCommand::AddIntent { intent, reply })
            .await?
    }

    /// Remove an intent by its `(intent_id, application_id)` key.
    pub async fn remove_intent(&self, intent: Intent) -> Result<Option<Intent>> {
        self.call(|reply| ServerCommand::RemoveIntent { intent, reply })
            .await
    }

    /// Find an intent by key whose parameter match accepts `parameters`.
    pub async fn find(
        &self,
        intent_id: &str,
        application_id: &str,
        parameters: ParameterMap,
    ) -> Result<Option<Intent>> {
        let intent_id = intent_id.to_string();
        let application_id = application_id.to_string();
        self.call(|reply| ServerCommand::FindIntent {
            intent_id,
            application_id,
            parameters,
            reply,
        })
        .await
    }

    /// Every registered intent.
    pub async fn intents(&self) -> Result<Vec<Intent>> {
        self.call(|reply| ServerCommand::ListIntents { reply }).await
    }

    /// Submit an intent request.
    ///
    /// The returned request only identifies the submission. The outcome is
    /// delivered to the requester through the system interface.
    pub async fn submit(
        &self,
        requesting_application_id: &str,
        intent_id: &str,
        application_id: Option<&str>,
        parameters: ParameterMap,
    ) -> Result<IntentRequest> {
        let requesting_application_id = requesting_application_id.to_string();
        let intent_id = intent_id.to_string();
        let application_id = application_id.map(str::to_string);
        self.call(|reply| ServerCommand::Submit {
            requesting_application_id,
            intent_id,
            application_id,
            parameters,
            reply,
        })
        .await?
    }

    /// Attach the disambiguation listener. See
    /// [`IntentServer::subscribe_disambiguation`].
    pub async fn subscribe_disambiguation(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<DisambiguationRequest>> {
        self.call(|reply| ServerCommand::SubscribeDisambiguation { reply })
            .await
    }

    /// Pick the handler for a request waiting on disambiguation.
    pub async fn resolve_disambiguation(&self, request_id: RequestId, selected: Intent) -> Result<()> {
        self.call(|reply| ServerCommand::ResolveDisambiguation {
            request_id,
            selected,
            reply,
        })
        .await?
    }

    /// Fail a request waiting on disambiguation.
    pub async fn reject_disambiguation(&self, request_id: RequestId) -> Result<()> {
        self.call(|reply| ServerCommand::RejectDisambiguation { request_id, reply })
            .await?
    }

    /// Tell the server an application has finished starting.
    pub fn notify_application_started(&self, application_id: &str) -> Result<()> {
        self.post(ServerCommand::ApplicationStarted {
            application_id: application_id.to_string(),
        })
    }

    /// Pass on a handler's reply to a request.
    pub async fn notify_reply(
        &self,
        application_id: &str,
        request_id: RequestId,
        is_error: bool,
        payload: ParameterMap,
    ) -> Result<()> {
        let application_id = application_id.to_string();
        self.call(|reply| ServerCommand::Reply {
            application_id,
            request_id,
            is_error,
            payload,
            reply,
        })
        .await?
    }

    /// Set the disambiguation timeout.
    pub async fn set_disambiguation_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_timeout(WaitStage::Disambiguation, timeout).await
    }

    /// Set the handler start timeout.
    pub async fn set_start_application_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_timeout(WaitStage::ApplicationStart, timeout).await
    }

    /// Set the handler reply timeout.
    pub async fn set_reply_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_timeout(WaitStage::Reply, timeout).await
    }

    async fn set_timeout(&self, stage: WaitStage, timeout: Duration) -> Result<()> {
        self.call(|reply| ServerCommand::SetTimeout {
            stage,
            timeout,
            reply,
        })
        .await?
    }

    /// Snapshot of the dispatcher counters.
    pub async fn metrics(&self) -> Result<ServerMetrics> {
        self.call(|reply| ServerCommand::Metrics { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intents::IntentVisibility;
    use crate::server::request::RequestOutcome;
    use crate::system::{ChannelSystemInterface, ClientChannel, SystemCommand};
    use serde_json::json;

    fn start() -> (
        IntentServerHandle,
        Arc<ChannelSystemInterface>,
        mpsc::UnboundedReceiver<SystemCommand>,
    ) {
        let (system, commands) = ChannelSystemInterface::new();
        let system = Arc::new(system);
        let handle = spawn_intent_server(IntentServerConfig::default(), system.clone()).unwrap();
        (handle, system, commands)
    }

    fn channel(app: &str) -> Option<ClientChannel> {
        Some(ClientChannel::new(app, &format!("{app}-conn")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_scenario() {
        let (handle, system, mut commands) = start();
        handle.register_application("A").await.unwrap();
        handle.register_application("B").await.unwrap();
        handle.add_intent(Intent::new("open", "A")).await.unwrap();
        system.set_running("B", channel("B"));

        let request = handle
            .submit("B", "open", None, ParameterMap::new())
            .await
            .unwrap();
        assert_eq!(request.potential_intents().len(), 1);

        match commands.recv().await.unwrap() {
            SystemCommand::StartApplication { application_id } => assert_eq!(application_id, "A"),
            other => panic!("unexpected command {other:?}"),
        }

        system.set_running("A", channel("A"));
        handle.notify_application_started("A").unwrap();
        match commands.recv().await.unwrap() {
            SystemCommand::DeliverRequest { channel, request: delivered } => {
                assert_eq!(channel.application_id, "A");
                assert_eq!(delivered.id(), request.id());
                assert_eq!(delivered.handling_application_id(), Some("A"));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let mut payload = ParameterMap::new();
        payload.insert("opened".to_string(), json!(true));
        handle
            .notify_reply("A", request.id(), false, payload.clone())
            .await
            .unwrap();
        match commands.recv().await.unwrap() {
            SystemCommand::DeliverReply { channel, request: finished } => {
                assert_eq!(channel.application_id, "B");
                assert_eq!(finished.result(), Some(&RequestOutcome::Succeeded(payload)));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.submitted_requests, 1);
        assert_eq!(metrics.succeeded_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_scenario_times_out_without_decision() {
        let (handle, system, mut commands) = start();
        for app in ["A1", "A2", "R"] {
            handle.register_application(app).await.unwrap();
        }
        handle.add_intent(Intent::new("view", "A1")).await.unwrap();
        handle.add_intent(Intent::new("view", "A2")).await.unwrap();
        system.set_running("R", channel("R"));
        handle
            .set_disambiguation_timeout(Duration::from_millis(200))
            .await
            .unwrap();

        let mut listener = handle.subscribe_disambiguation().await.unwrap();
        let request = handle
            .submit("R", "view", None, ParameterMap::new())
            .await
            .unwrap();

        let notification = listener.recv().await.unwrap();
        assert_eq!(notification.request_id, request.id());
        assert_eq!(notification.potential_intents.len(), 2);

        match commands.recv().await.unwrap() {
            SystemCommand::DeliverReply { channel, request: failed } => {
                assert_eq!(channel.application_id, "R");
                assert_eq!(
                    failed.result(),
                    Some(&RequestOutcome::Failed(
                        "Disambiguation timed out after 200 ms".to_string()
                    ))
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disambiguation_through_handle() {
        let (handle, system, mut commands) = start();
        for app in ["A1", "A2", "R"] {
            handle.register_application(app).await.unwrap();
            system.set_running(app, channel(app));
        }
        handle.add_intent(Intent::new("view", "A1")).await.unwrap();
        let chosen = handle.add_intent(Intent::new("view", "A2")).await.unwrap();

        let mut listener = handle.subscribe_disambiguation().await.unwrap();
        handle
            .submit("R", "view", None, ParameterMap::new())
            .await
            .unwrap();
        let notification = listener.recv().await.unwrap();

        handle
            .resolve_disambiguation(notification.request_id, chosen)
            .await
            .unwrap();
        match commands.recv().await.unwrap() {
            SystemCommand::DeliverRequest { channel, .. } => assert_eq!(channel.application_id, "A2"),
            other => panic!("unexpected command {other:?}"),
        }

        let again = handle.reject_disambiguation(notification.request_id).await;
        assert!(matches!(again, Err(Error::RequestNotPending(_))));
    }

    #[tokio::test]
    async fn test_registry_through_handle() {
        let (handle, _system, _commands) = start();
        let mut events = handle.subscribe_registry_events();

        assert!(handle.register_application("A").await.unwrap());
        assert!(!handle.register_application("A").await.unwrap());
        assert!(handle.register_background_handler("A", "svc").await.unwrap());

        let intent = handle
            .add_intent(
                Intent::new("open", "A")
                    .with_background_handler("svc")
                    .with_visibility(IntentVisibility::Private),
            )
            .await
            .unwrap();
        assert!(handle.add_intent(Intent::new("open", "A")).await.is_err());

        assert_eq!(
            handle.find("open", "A", ParameterMap::new()).await.unwrap(),
            Some(intent.clone())
        );
        assert_eq!(handle.intents().await.unwrap().len(), 1);

        assert_eq!(events.recv().await.unwrap(), RegistryEvent::IntentAdded(intent.clone()));
        assert_eq!(events.recv().await.unwrap(), RegistryEvent::IntentListChanged);

        assert_eq!(
            handle.remove_intent(intent.clone()).await.unwrap(),
            Some(intent.clone())
        );
        assert_eq!(events.recv().await.unwrap(), RegistryEvent::IntentRemoved(intent));
        assert!(handle.intents().await.unwrap().is_empty());

        handle.unregister_background_handler("A", "svc").unwrap();
        handle.unregister_application("A").unwrap();
        assert!(handle.add_intent(Intent::new("open", "A")).await.is_err());
    }

    #[tokio::test]
    async fn test_submit_rejection_through_handle() {
        let (handle, _system, _commands) = start();
        handle.register_application("A").await.unwrap();

        let result = handle.submit("ghost", "open", None, ParameterMap::new()).await;
        assert!(matches!(result, Err(Error::UnknownRequester { .. })));
        assert_eq!(handle.metrics().await.unwrap().rejected_requests, 1);
    }

    #[tokio::test]
    async fn test_invalid_timeout() {
        let (handle, _system, _commands) = start();
        let result = handle.set_reply_timeout(Duration::ZERO).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(handle
            .set_start_application_timeout(Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[test]
    fn test_spawn_outside_runtime() {
        let (system, _commands) = ChannelSystemInterface::new();
        let result = spawn_intent_server(IntentServerConfig::default(), Arc::new(system));
        assert!(matches!(result, Err(Error::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_stopped_server() {
        let (commands, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = IntentServerHandle {
            commands,
            registry_events: RegistryEvents::default(),
        };

        assert!(handle.is_closed());
        assert!(matches!(
            handle.register_application("A").await,
            Err(Error::ServerStopped)
        ));
        assert!(matches!(
            handle.notify_application_started("A"),
            Err(Error::ServerStopped)
        ));
    }
}
