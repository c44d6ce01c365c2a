//! Built-in consumers of inbound batches

use std::sync::Arc;

use serde_json::Value;

use super::bus::EventBus;
use crate::dispatch::CommandQueue;
use crate::error::Result;
use crate::retry::{OperationMatch, resolve_operation};
use crate::store::OperationStore;
use crate::telemetry::TelemeterQueue;
use crate::types::commands::{ROLLBACK_AGENT, UPDATE_AGENT};
use crate::types::events::{AgentEvent, UpdateStatus};
use crate::types::messages::{AgentMessage, Completion};
use crate::types::operations::OperationStatus;

/// Operation types an `update_success`/`update_failed` report resolves
const SELF_UPDATE_OPERATIONS: [&str; 2] = [UPDATE_AGENT, ROLLBACK_AGENT];

/// Register the forwarding, completion and operation consumers on `telemeter`
pub(crate) fn register(
    telemeter: &TelemeterQueue,
    queue: Arc<CommandQueue>,
    store: Arc<dyn OperationStore>,
    bus: EventBus,
) {
    let forward_bus = bus.clone();
    telemeter.subscribe(move |batch: Arc<[AgentMessage]>| {
        let bus = forward_bus.clone();
        async move {
            for message in batch.iter() {
                bus.emit(AgentEvent::AgentMessage(message.clone()));
            }
            Ok(())
        }
    });

    telemeter.subscribe(move |batch: Arc<[AgentMessage]>| {
        let queue = Arc::clone(&queue);
        let bus = bus.clone();
        async move {
            for message in batch.iter() {
                if let Some(completion) = message.completion() {
                    complete_command(&queue, &bus, message, completion).await;
                }
            }
            Ok(())
        }
    });

    telemeter.subscribe(move |batch: Arc<[AgentMessage]>| {
        let store = Arc::clone(&store);
        async move {
            let mut failure = None;
            for message in batch.iter() {
                if let Err(e) = complete_operation(store.as_ref(), message).await {
                    log::warn!("Failed to update operation from agent {}: {e}", message.agent_id);
                    failure = Some(e);
                }
            }
            failure.map_or(Ok(()), Err)
        }
    });
}

/// Free the agent from the command a terminal message reports on
async fn complete_command(
    queue: &CommandQueue,
    bus: &EventBus,
    message: &AgentMessage,
    completion: Completion,
) {
    let agent_id = &message.agent_id;
    let registry = queue.registry();

    match &message.command_id {
        Some(command_id) => {
            queue.acknowledge(agent_id, command_id).await;
        }
        None => match completion {
            Completion::UpdateSucceeded | Completion::UpdateFailed => {
                let updating = registry
                    .current_command(agent_id)
                    .is_some_and(|command| command.payload.is_self_update());
                if updating {
                    queue.mark_agent_available(agent_id).await;
                }
            }
            _ => {
                queue.mark_agent_available(agent_id).await;
            }
        },
    }

    let status = match completion {
        Completion::UpdateSucceeded => UpdateStatus::Success,
        Completion::UpdateFailed => UpdateStatus::Failed,
        _ => return,
    };

    if let Some(confirmed) = registry.take_confirmed_update(agent_id, message.command_id.as_ref()) {
        if status == UpdateStatus::Success {
            log::debug!(
                "Agent {agent_id} reported {} ({}) already confirmed by its reconnect",
                confirmed.kind(),
                confirmed.id
            );
            return;
        }
        log::warn!(
            "Agent {agent_id} reported {} ({}) failed after its reconnect was taken as success",
            confirmed.kind(),
            confirmed.id
        );
    }

    let pending = registry.take_unconfirmed_update(agent_id);
    let details = match (&pending, &message.error) {
        (_, Some(Value::String(error))) => error.clone(),
        (_, Some(error)) if !error.is_null() => error.to_string(),
        (Some(command), _) => format!("{} ({}) confirmed by agent", command.kind(), command.id),
        (None, _) => "reported by agent".to_string(),
    };
    bus.emit(AgentEvent::AgentUpdated {
        agent_id: agent_id.clone(),
        status,
        details,
    });
}

/// Mark the pending operation a terminal message reports on
async fn complete_operation(store: &dyn OperationStore, message: &AgentMessage) -> Result<()> {
    let status = match message.completion() {
        Some(Completion::Completed | Completion::UpdateSucceeded) => OperationStatus::Completed,
        Some(Completion::Failed | Completion::UpdateFailed) => OperationStatus::Failed,
        Some(Completion::Error) if message.operation_id.is_some() => OperationStatus::Failed,
        _ => return Ok(()),
    };

    let update_reported = matches!(
        message.completion(),
        Some(Completion::UpdateSucceeded | Completion::UpdateFailed)
    );
    let reported_kind;
    let domain = message.domain.as_deref();
    let target = if let Some(operation_id) = &message.operation_id {
        OperationMatch::Id(operation_id)
    } else if let Some(kind) = &message.operation {
        reported_kind = [kind.as_str()];
        OperationMatch::Kind {
            kinds: &reported_kind,
            domain,
        }
    } else if update_reported {
        OperationMatch::Kind {
            kinds: &SELF_UPDATE_OPERATIONS,
            domain,
        }
    } else {
        return Ok(());
    };

    resolve_operation(store, &message.agent_id, target, status).await?;
    Ok(())
}
