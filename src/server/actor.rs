//! The task that owns the intent server.

use crate::server::dispatcher::IntentServer;
use crate::server::protocol::{ScheduledEvent, ServerCommand};
use tokio::sync::mpsc;
use tracing::debug;

pub(crate) struct IntentServerActor {
    server: IntentServer,
    commands: mpsc::UnboundedReceiver<ServerCommand>,
    scheduled: mpsc::UnboundedReceiver<ScheduledEvent>,
}

impl IntentServerActor {
    pub(crate) fn new(
        server: IntentServer,
        commands: mpsc::UnboundedReceiver<ServerCommand>,
        scheduled: mpsc::UnboundedReceiver<ScheduledEvent>,
    ) -> Self {
        Self {
            server,
            commands,
            scheduled,
        }
    }

    /// Serve until every handle is dropped.
    ///
    /// Host commands and the server's own scheduled work share this single
    /// loop, so exactly one of them runs at a time.
    pub(crate) async fn run(self) {
        let Self {
            mut server,
            mut commands,
            mut scheduled,
        } = self;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => handle_command(&mut server, command),
                    None => break,
                },
                Some(event) = scheduled.recv() => server.handle_scheduled(event),
            }
        }

        debug!(
            pending = server.pending_request_count(),
            "Intent server stopped"
        );
    }
}

fn handle_command(server: &mut IntentServer, command: ServerCommand) {
    match command {
        ServerCommand::RegisterApplication {
            application_id,
            reply,
        } => {
            let _ = reply.send(server.registry_mut().register_application(&application_id));
        }
        ServerCommand::UnregisterApplication { application_id } => {
            server.registry_mut().unregister_application(&application_id);
        }
        ServerCommand::RegisterBackgroundHandler {
            application_id,
            handler_id,
            reply,
        } => {
            let added = server
                .registry_mut()
                .register_background_handler(&application_id, &handler_id);
            let _ = reply.send(added);
        }
        ServerCommand::UnregisterBackgroundHandler {
            application_id,
            handler_id,
        } => {
            server
                .registry_mut()
                .unregister_background_handler(&application_id, &handler_id);
        }
        ServerCommand::AddIntent { intent, reply } => {
            let _ = reply.send(server.registry_mut().add_intent(intent));
        }
        ServerCommand::RemoveIntent { intent, reply } => {
            let _ = reply.send(server.registry_mut().remove_intent(&intent));
        }
        ServerCommand::FindIntent {
            intent_id,
            application_id,
            parameters,
            reply,
        } => {
            let found = server
                .registry()
                .find(&intent_id, &application_id, &parameters)
                .cloned();
            let _ = reply.send(found);
        }
        ServerCommand::ListIntents { reply } => {
            let _ = reply.send(server.registry().all().to_vec());
        }
        ServerCommand::Submit {
            requesting_application_id,
            intent_id,
            application_id,
            parameters,
            reply,
        } => {
            let result = server.submit(
                &requesting_application_id,
                &intent_id,
                application_id.as_deref(),
                parameters,
            );
            let _ = reply.send(result);
        }
        ServerCommand::SubscribeDisambiguation { reply } => {
            let _ = reply.send(server.subscribe_disambiguation());
        }
        ServerCommand::ResolveDisambiguation {
            request_id,
            selected,
            reply,
        } => {
            let _ = reply.send(server.resolve_disambiguation(request_id, &selected));
        }
        ServerCommand::RejectDisambiguation { request_id, reply } => {
            let _ = reply.send(server.reject_disambiguation(request_id));
        }
        ServerCommand::ApplicationStarted { application_id } => {
            server.application_started(&application_id);
        }
        ServerCommand::Reply {
            application_id,
            request_id,
            is_error,
            payload,
            reply,
        } => {
            let result =
                server.reply_from_application(&application_id, request_id, is_error, payload);
            let _ = reply.send(result);
        }
        ServerCommand::SetTimeout {
            stage,
            timeout,
            reply,
        } => {
            let _ = reply.send(server.set_timeout(stage, timeout));
        }
        ServerCommand::Metrics { reply } => {
            let _ = reply.send(server.metrics().clone());
        }
    }
}
