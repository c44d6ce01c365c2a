//! Outbound command queue
//!
//! Holds a priority-ordered backlog per agent and dispatches at most one
//! command per agent at a time. The backlog itself lives in the
//! [`FleetRegistry`]; this module adds the dispatch tick, the journal
//! write-through, and the events that report delivery failures.
//!
//! See [`timeout`] for the sweep that frees agents stuck on a command.

pub mod timeout;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{GatewayError, Result};
use crate::hub::EventBus;
use crate::registry::FleetRegistry;
use crate::store::OperationStore;
use crate::types::commands::{CommandPayload, CommandStatus, OutboundCommand};
use crate::types::events::AgentEvent;
use crate::types::identifiers::{AgentId, CommandId};
use crate::types::stats::OutboundStats;

/// Per-agent command backlog with single-flight dispatch
pub struct CommandQueue {
    registry: Arc<FleetRegistry>,
    store: Arc<dyn OperationStore>,
    bus: EventBus,
    command_timeout: Duration,
    update_confirm_window: Option<Duration>,
    stats_agent_limit: usize,
}

impl CommandQueue {
    /// Create a queue over `registry`
    ///
    /// # Arguments
    /// * `command_timeout` - how long a dispatched command may run
    /// * `update_confirm_window` - how long a timed-out self-update stays open to
    ///   confirmation by a reconnect; `None` disables the confirmation
    /// * `stats_agent_limit` - cap on per-agent entries in [`stats`](Self::stats)
    pub fn new(
        registry: Arc<FleetRegistry>,
        store: Arc<dyn OperationStore>,
        bus: EventBus,
        command_timeout: Duration,
        update_confirm_window: Option<Duration>,
        stats_agent_limit: usize,
    ) -> Self {
        Self {
            registry,
            store,
            bus,
            command_timeout,
            update_confirm_window,
            stats_agent_limit,
        }
    }

    /// Queue `payload` for `agent_id`. Higher `priority` dispatches first.
    pub async fn enqueue(
        &self,
        agent_id: AgentId,
        payload: CommandPayload,
        priority: i32,
    ) -> CommandId {
        self.enqueue_command(OutboundCommand::new(agent_id, payload, priority))
            .await
    }

    /// Queue a prepared command, journalling it first
    pub async fn enqueue_command(&self, mut command: OutboundCommand) -> CommandId {
        command.status = CommandStatus::Queued;
        command.dispatched_at = None;
        if let Err(e) = self.store.save_command(&command).await {
            log::warn!("Failed to journal command {}: {e}", command.id);
        }

        let id = command.id.clone();
        let agent_id = command.agent_id.clone();
        let kind = command.kind().to_string();
        let queued = self.registry.push_command(command);
        log::debug!("Queued {kind} ({id}) for agent {agent_id}, backlog {queued}");
        id
    }

    /// Reload journalled commands into the backlogs
    ///
    /// # Errors
    /// Returns error if the journal cannot be read
    pub async fn restore(&self) -> Result<usize> {
        let commands = self.store.load_commands().await?;
        let restored = commands.len();
        for mut command in commands {
            command.status = CommandStatus::Queued;
            command.dispatched_at = None;
            self.registry.push_command(command);
        }
        if restored > 0 {
            log::info!("Restored {restored} journalled commands");
        }
        Ok(restored)
    }

    /// Free the agent from its in-flight command, whatever it is.
    ///
    /// Idempotent: returns `false` if the agent was already idle.
    pub async fn mark_agent_available(&self, agent_id: &AgentId) -> bool {
        match self.registry.release(agent_id) {
            Some(command) => {
                self.forget(&command).await;
                log::debug!("Agent {agent_id} available after {}", command.kind());
                true
            }
            None => false,
        }
    }

    /// Free the agent only if `command_id` is its in-flight command.
    ///
    /// A completion for an older command (for instance one that already timed
    /// out) returns `false` and leaves the current dispatch alone.
    pub async fn acknowledge(&self, agent_id: &AgentId, command_id: &CommandId) -> bool {
        match self.registry.release_if(agent_id, command_id) {
            Some(command) => {
                self.forget(&command).await;
                log::debug!("Agent {agent_id} acknowledged {} ({command_id})", command.kind());
                true
            }
            None => {
                log::debug!("Ignoring completion of stale command {command_id} from {agent_id}");
                false
            }
        }
    }

    /// Free the agent from a self-update whose success is inferred from the
    /// agent reconnecting.
    ///
    /// The command stays recorded as confirmed until the agent's next
    /// dispatch. Returns `None` if `command_id` is no longer in flight.
    pub async fn confirm_update(
        &self,
        agent_id: &AgentId,
        command_id: &CommandId,
    ) -> Option<OutboundCommand> {
        let command = self.registry.confirm_in_flight(agent_id, command_id)?;
        self.forget(&command).await;
        log::debug!("Agent {agent_id} confirmed {} ({command_id}) by reconnecting", command.kind());
        Some(command)
    }

    /// Dispatch the head command of every connected idle agent.
    ///
    /// Each agent is handled independently: a failed send frees that agent and
    /// emits [`AgentEvent::CommandError`] without affecting the others.
    /// The journal entry written at enqueue is left as is; it goes away when
    /// the command is acknowledged, times out or fails to send.
    /// Returns the number of commands delivered.
    ///
    /// # Errors
    /// Currently infallible; the signature leaves room for loop-level failures
    /// counted by the circuit breaker
    pub async fn dispatch_tick(&self) -> Result<usize> {
        let dispatched = self.registry.begin_dispatch(Instant::now());
        let mut delivered = 0;

        for command in dispatched {
            let sent = serde_json::to_string(&command.to_wire())
                .map_err(GatewayError::from)
                .and_then(|frame| self.registry.send(&command.agent_id, frame));

            match sent {
                Ok(()) => {
                    delivered += 1;
                    log::debug!(
                        "Dispatched {} ({}) to agent {}",
                        command.kind(),
                        command.id,
                        command.agent_id
                    );
                }
                Err(e) => self.fail_dispatch(command, &e).await,
            }
        }

        Ok(delivered)
    }

    async fn fail_dispatch(&self, command: OutboundCommand, error: &GatewayError) {
        log::warn!(
            "Failed to dispatch {} to agent {}: {error}",
            command.kind(),
            command.agent_id
        );
        self.registry.release_if(&command.agent_id, &command.id);
        self.forget(&command).await;
        self.bus.emit(AgentEvent::CommandError {
            agent_id: command.agent_id.clone(),
            error: error.to_string(),
            command,
        });
    }

    async fn forget(&self, command: &OutboundCommand) {
        if let Err(e) = self.store.remove_command(&command.id).await {
            log::warn!("Failed to remove command {} from journal: {e}", command.id);
        }
    }

    /// Outbound statistics
    #[must_use]
    pub fn stats(&self) -> OutboundStats {
        self.registry
            .outbound_stats(self.stats_agent_limit, Instant::now())
    }

    /// The registry this queue dispatches from
    #[must_use]
    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    /// Configured command timeout
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}
