//! Transport gateway
//!
//! The gateway owns the connection side of an agent session: it verifies
//! credentials, attaches and detaches live links in the registry, hands every
//! inbound frame to the telemeter queue, and applies the reconnect heuristic
//! to whatever command was in flight when an agent comes back.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::auth::Authenticator;
use crate::dispatch::CommandQueue;
use crate::error::{GatewayError, Result};
use crate::hub::EventBus;
use crate::message::parse_frame;
use crate::registry::FleetRegistry;
use crate::retry::{OperationMatch, resolve_operation};
use crate::store::OperationStore;
use crate::telemetry::TelemeterQueue;
use crate::transport::AgentLink;
use crate::types::commands::OutboundCommand;
use crate::types::events::{AgentEvent, UpdateStatus};
use crate::types::identifiers::{AgentId, ConnectionId};
use crate::types::operations::{AgentConnectivity, OperationStatus};

/// Connection-facing half of the gateway core
pub struct Gateway {
    auth: Arc<dyn Authenticator>,
    queue: Arc<CommandQueue>,
    telemeter: Arc<TelemeterQueue>,
    store: Arc<dyn OperationStore>,
    bus: EventBus,
    reconnect_implies_update_success: bool,
}

impl Gateway {
    /// Create a gateway
    pub fn new(
        auth: Arc<dyn Authenticator>,
        queue: Arc<CommandQueue>,
        telemeter: Arc<TelemeterQueue>,
        store: Arc<dyn OperationStore>,
        bus: EventBus,
        reconnect_implies_update_success: bool,
    ) -> Self {
        Self {
            auth,
            queue,
            telemeter,
            store,
            bus,
            reconnect_implies_update_success,
        }
    }

    fn registry(&self) -> &FleetRegistry {
        self.queue.registry()
    }

    /// Verify credentials and attach `link` as the agent's live connection.
    ///
    /// A previous connection for the same identity is replaced; its backlog and
    /// in-flight command carry over. Any command that was in flight across the
    /// reconnect is resolved before [`AgentEvent::AgentConnected`] is emitted,
    /// so redelivery triggered by the connect sees the resolved state. A
    /// self-update confirmed by the reconnect marks its pending operation
    /// completed and is announced right after the connect event.
    ///
    /// # Errors
    /// Returns `GatewayError::AuthenticationFailure` if the identity is empty or
    /// the key is rejected. No session is created and nothing is emitted.
    pub async fn accept_connection(
        &self,
        agent_id: AgentId,
        agent_key: &str,
        link: AgentLink,
    ) -> Result<ConnectionId> {
        if agent_id.as_str().is_empty() {
            return Err(GatewayError::authentication("<empty>"));
        }

        self.registry().begin_connect(&agent_id);
        if !self.auth.verify(&agent_id, agent_key).await {
            self.registry().abort_connect(&agent_id);
            log::warn!("Rejected connection for agent {agent_id}: invalid key");
            return Err(GatewayError::authentication(agent_id.as_str()));
        }

        let attached = self.registry().attach(&agent_id, link);
        if attached.replaced {
            log::info!("Agent {agent_id} reconnected, replacing previous connection");
        } else {
            log::info!("Agent {agent_id} connected");
        }

        let confirmed = match attached.in_flight {
            Some(command) => self
                .resolve_in_flight(&agent_id, command)
                .await
                .map(|command| (command, "agent reconnected after update")),
            None => None,
        }
        .or_else(|| {
            attached
                .unconfirmed_update
                .map(|command| (command, "agent reconnected after update timed out"))
        });
        if let Some((command, _)) = &confirmed {
            self.complete_update_operation(&agent_id, command).await;
        }

        self.record_connectivity(&agent_id, true).await;
        self.bus.emit(AgentEvent::AgentConnected {
            agent_id: agent_id.clone(),
        });

        if let Some((command, how)) = confirmed {
            log::info!("Treating {} on agent {agent_id} as successful: {how}", command.kind());
            self.bus.emit(AgentEvent::AgentUpdated {
                agent_id: agent_id.clone(),
                status: UpdateStatus::Success,
                details: format!("{} ({}): {how}", command.kind(), command.id),
            });
        }

        Ok(attached.connection_id)
    }

    /// Free the agent from the command it was running before it reconnected.
    ///
    /// Returns the command when the reconnect confirms it as a self-update.
    async fn resolve_in_flight(
        &self,
        agent_id: &AgentId,
        command: OutboundCommand,
    ) -> Option<OutboundCommand> {
        if command.payload.is_self_update() && self.reconnect_implies_update_success {
            return self.queue.confirm_update(agent_id, &command.id).await;
        }
        if self.queue.acknowledge(agent_id, &command.id).await {
            log::info!(
                "Agent {agent_id} reconnected while running {}; freed without a result",
                command.kind()
            );
        }
        None
    }

    /// Mark the pending operation behind a confirmed self-update completed
    async fn complete_update_operation(&self, agent_id: &AgentId, command: &OutboundCommand) {
        let kinds = [command.kind()];
        let target = match &command.operation_id {
            Some(operation_id) => OperationMatch::Id(operation_id),
            None => OperationMatch::Kind {
                kinds: &kinds,
                domain: None,
            },
        };
        let resolved =
            resolve_operation(self.store.as_ref(), agent_id, target, OperationStatus::Completed)
                .await;
        if let Err(e) = resolved {
            log::warn!(
                "Failed to complete operation of {} ({}) on agent {agent_id}: {e}",
                command.kind(),
                command.id
            );
        }
    }

    /// Parse one text frame from `agent_id` and hand it to the telemeter queue.
    ///
    /// Unparseable frames are logged and dropped. Returns whether the message
    /// was queued (`false` for parse failures and duplicates).
    pub fn on_message(&self, agent_id: &AgentId, frame: &str) -> bool {
        let message = match parse_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping frame from agent {agent_id}: {e}");
                return false;
            }
        };

        if &message.agent_id != agent_id {
            log::warn!(
                "Agent {agent_id} sent a message claiming to be {}; using the session identity",
                message.agent_id
            );
        }

        self.telemeter.enqueue(message, agent_id.clone(), None)
    }

    /// Tear down the session of `connection_id`.
    ///
    /// Closes of a connection that has already been replaced are ignored.
    /// Queued and in-flight work is retained for the next connection.
    pub async fn on_close(&self, agent_id: &AgentId, connection_id: ConnectionId) {
        if !self.registry().detach(agent_id, connection_id) {
            log::debug!(
                "Ignoring close of replaced connection {} for agent {agent_id}",
                connection_id.get()
            );
            return;
        }

        log::info!("Agent {agent_id} disconnected");
        self.record_connectivity(agent_id, false).await;
        self.bus.emit(AgentEvent::AgentDisconnected {
            agent_id: agent_id.clone(),
        });
    }

    /// Write a JSON payload to the agent's live connection
    ///
    /// # Errors
    /// Returns `GatewayError::TransportUnavailable` if the agent is not connected
    pub fn send(&self, agent_id: &AgentId, payload: &Value) -> Result<()> {
        let frame = serde_json::to_string(payload)?;
        self.registry().send(agent_id, frame)
    }

    async fn record_connectivity(&self, agent_id: &AgentId, online: bool) {
        let connectivity = AgentConnectivity {
            online,
            last_change: Utc::now(),
        };
        if let Err(e) = self.store.set_connectivity(agent_id, connectivity).await {
            log::warn!("Failed to record connectivity of agent {agent_id}: {e}");
        }
    }
}
