//! Operation retry coordinator
//!
//! Redelivers durable [`PendingOperation`]s to their agents. Two triggers run
//! the same redelivery:
//!
//! - a periodic sweep over every pending row ([`RetryCoordinator::check_pending_operations`])
//! - an agent connecting, scoped to that agent's rows ([`RetryCoordinator::on_agent_connected`])
//!
//! Both share one in-progress flag. A trigger that arrives while a redelivery
//! is running is skipped, not queued.

mod catalog;
mod resolve;

use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::CommandQueue;
use crate::error::Result;
use crate::flag::InProgress;
use crate::hub::EventBus;
use crate::store::OperationStore;
use crate::types::commands::{CommandPayload, OutboundCommand};
use crate::types::events::AgentEvent;
use crate::types::identifiers::{AgentId, OperationId};
use crate::types::operations::PendingOperation;

pub use catalog::{CommandBuilder, OperationCatalog};
pub(crate) use resolve::{OperationMatch, resolve_operation};

/// Redelivers pending operations to connected agents
pub struct RetryCoordinator {
    store: Arc<dyn OperationStore>,
    queue: Arc<CommandQueue>,
    catalog: RwLock<OperationCatalog>,
    in_progress: InProgress,
}

impl RetryCoordinator {
    /// Create a coordinator
    pub fn new(
        store: Arc<dyn OperationStore>,
        queue: Arc<CommandQueue>,
        catalog: OperationCatalog,
    ) -> Self {
        Self {
            store,
            queue,
            catalog: RwLock::new(catalog),
            in_progress: InProgress::default(),
        }
    }

    /// Subscribe to [`AgentEvent::AgentConnected`] and redeliver on every connect.
    ///
    /// The subscription is taken before this returns, so no connect emitted
    /// afterwards is missed. The task holds only a weak reference and ends when
    /// the coordinator is dropped, the bus closes, or `cancel` fires.
    pub fn listen(self: &Arc<Self>, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let mut events = bus.subscribe();
        let this: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(AgentEvent::AgentConnected { agent_id }) => {
                        let Some(coordinator) = this.upgrade() else {
                            break;
                        };
                        if let Err(e) = coordinator.on_agent_connected(&agent_id).await {
                            log::warn!("Redelivery on connect of agent {agent_id} failed: {e}");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Retry listener lagged, {skipped} events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::debug!("Retry listener stopped");
        })
    }

    /// Register a command builder for an operation type
    pub fn register_operation<F>(&self, operation_type: impl Into<String>, builder: F)
    where
        F: Fn(&PendingOperation) -> Result<CommandPayload> + Send + Sync + 'static,
    {
        self.catalog.write().register(operation_type, builder);
    }

    /// Register an operation type forwarded as a passthrough command
    pub fn register_passthrough(&self, operation_type: impl Into<String>) {
        self.catalog.write().register_passthrough(operation_type);
    }

    /// Redeliver every pending operation whose agent is connected.
    ///
    /// Returns the number of operations redelivered, zero when skipped.
    ///
    /// # Errors
    /// Returns error if the pending rows cannot be listed
    pub async fn check_pending_operations(&self) -> Result<usize> {
        self.redeliver(None).await
    }

    /// Redeliver the pending operations of one freshly connected agent
    ///
    /// # Errors
    /// Same as [`check_pending_operations`](Self::check_pending_operations)
    pub async fn on_agent_connected(&self, agent_id: &AgentId) -> Result<usize> {
        self.redeliver(Some(agent_id)).await
    }

    async fn redeliver(&self, scope: Option<&AgentId>) -> Result<usize> {
        let Some(_running) = self.in_progress.try_begin() else {
            log::debug!("Redelivery already running, skipping trigger");
            return Ok(0);
        };

        let pending = self.store.list_pending(scope).await?;
        let registry = self.queue.registry();
        let mut redelivered = 0;

        for operation in pending {
            if !registry.is_online(&operation.agent_id) {
                continue;
            }
            if registry.has_operation(&operation.agent_id, &operation.id) {
                log::debug!("Operation {} is already queued, not redelivering", operation.id);
                continue;
            }

            let resolved = self.catalog.read().resolve(&operation);
            let payload = match resolved {
                Ok(payload) => payload,
                Err(e) => {
                    log::warn!("Leaving operation {} pending: {e}", operation.id);
                    continue;
                }
            };

            let updated = match self.store.record_retry(&operation.id, Utc::now()).await {
                Ok(updated) => updated,
                Err(e) => {
                    log::warn!(
                        "Failed to record retry of operation {}, leaving it for the next sweep: {e}",
                        operation.id
                    );
                    continue;
                }
            };

            let command = OutboundCommand::new(operation.agent_id.clone(), payload, operation.priority)
                .for_operation(operation.id.clone());
            self.queue.enqueue_command(command).await;
            log::info!(
                "Redelivered operation {} ({}) to agent {}, attempt {}",
                updated.id,
                updated.operation_type,
                updated.agent_id,
                updated.retry_count
            );
            redelivered += 1;
        }

        Ok(redelivered)
    }

    /// Persist a new operation and dispatch it right away if its agent is online.
    ///
    /// An operation whose type cannot be resolved is still persisted and stays
    /// pending.
    ///
    /// # Errors
    /// Returns error if the row cannot be created
    pub async fn track(&self, operation: PendingOperation) -> Result<OperationId> {
        self.store.create_operation(operation.clone()).await?;
        let id = operation.id.clone();

        if !self.queue.registry().is_online(&operation.agent_id) {
            log::debug!(
                "Agent {} is offline, operation {id} waits for reconnect",
                operation.agent_id
            );
            return Ok(id);
        }

        let resolved = self.catalog.read().resolve(&operation);
        match resolved {
            Ok(payload) => {
                let command = OutboundCommand::new(operation.agent_id, payload, operation.priority)
                    .for_operation(id.clone());
                self.queue.enqueue_command(command).await;
            }
            Err(e) => log::warn!("Operation {id} tracked but not dispatched: {e}"),
        }
        Ok(id)
    }

    /// Whether a redelivery is running right now
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_progress.is_set()
    }
}
