//! Persistence collaborator
//!
//! The gateway core reads and writes durable state only through
//! [`OperationStore`]: pending operations, agent connectivity, and the journal
//! of outbound commands that lets queued work survive a restart.
//!
//! - [`MemoryStore`] keeps everything in process memory
//! - [`JsonFileStore`] mirrors the same state to a JSON file after every write

mod file;
mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::types::commands::OutboundCommand;
use crate::types::identifiers::{AgentId, CommandId, OperationId};
use crate::types::operations::{AgentConnectivity, OperationStatus, PendingOperation};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Boxed future returned by [`OperationStore`] methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Key-indexed read/write access to durable gateway state
pub trait OperationStore: Send + Sync {
    /// Insert a new operation row
    fn create_operation(&self, operation: PendingOperation) -> StoreFuture<'_, ()>;

    /// Fetch one operation row
    fn get_operation<'a>(&'a self, id: &'a OperationId)
    -> StoreFuture<'a, Option<PendingOperation>>;

    /// All rows with status `pending`, optionally scoped to one agent, oldest first
    fn list_pending<'a>(
        &'a self,
        agent_id: Option<&'a AgentId>,
    ) -> StoreFuture<'a, Vec<PendingOperation>>;

    /// Increment `retry_count` and stamp `last_retry_at`, returning the updated row
    fn record_retry<'a>(
        &'a self,
        id: &'a OperationId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, PendingOperation>;

    /// Set the status of a row
    fn set_status<'a>(&'a self, id: &'a OperationId, status: OperationStatus)
    -> StoreFuture<'a, ()>;

    /// Record an agent's connectivity
    fn set_connectivity<'a>(
        &'a self,
        agent_id: &'a AgentId,
        connectivity: AgentConnectivity,
    ) -> StoreFuture<'a, ()>;

    /// Read an agent's last recorded connectivity
    fn connectivity<'a>(&'a self, agent_id: &'a AgentId)
    -> StoreFuture<'a, Option<AgentConnectivity>>;

    /// Insert or replace a journalled outbound command
    fn save_command<'a>(&'a self, command: &'a OutboundCommand) -> StoreFuture<'a, ()>;

    /// Drop a journalled outbound command; unknown IDs are ignored
    fn remove_command<'a>(&'a self, id: &'a CommandId) -> StoreFuture<'a, ()>;

    /// All journalled outbound commands, oldest first
    fn load_commands(&self) -> StoreFuture<'_, Vec<OutboundCommand>>;
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared by both store implementations; also the JSON file layout
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreState {
    #[serde(default)]
    operations: HashMap<OperationId, PendingOperation>,
    #[serde(default)]
    connectivity: HashMap<AgentId, AgentConnectivity>,
    #[serde(default)]
    commands: HashMap<CommandId, OutboundCommand>,
}

impl StoreState {
    pub(crate) fn create_operation(&mut self, operation: PendingOperation) -> Result<()> {
        if self.operations.contains_key(&operation.id) {
            return Err(GatewayError::store(format!(
                "operation {} already exists",
                operation.id
            )));
        }
        self.operations.insert(operation.id.clone(), operation);
        Ok(())
    }

    pub(crate) fn get_operation(&self, id: &OperationId) -> Option<PendingOperation> {
        self.operations.get(id).cloned()
    }

    pub(crate) fn list_pending(&self, agent_id: Option<&AgentId>) -> Vec<PendingOperation> {
        let mut rows: Vec<PendingOperation> = self
            .operations
            .values()
            .filter(|op| op.is_pending())
            .filter(|op| agent_id.is_none_or(|agent| &op.agent_id == agent))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }

    pub(crate) fn record_retry(
        &mut self,
        id: &OperationId,
        at: DateTime<Utc>,
    ) -> Result<PendingOperation> {
        let operation = self
            .operations
            .get_mut(id)
            .ok_or_else(|| GatewayError::store(format!("operation {id} not found")))?;
        operation.retry_count = operation.retry_count.saturating_add(1);
        operation.last_retry_at = Some(at);
        Ok(operation.clone())
    }

    pub(crate) fn set_status(&mut self, id: &OperationId, status: OperationStatus) -> Result<()> {
        let operation = self
            .operations
            .get_mut(id)
            .ok_or_else(|| GatewayError::store(format!("operation {id} not found")))?;
        operation.status = status;
        Ok(())
    }

    pub(crate) fn set_connectivity(&mut self, agent_id: &AgentId, connectivity: AgentConnectivity) {
        self.connectivity.insert(agent_id.clone(), connectivity);
    }

    pub(crate) fn connectivity(&self, agent_id: &AgentId) -> Option<AgentConnectivity> {
        self.connectivity.get(agent_id).cloned()
    }

    pub(crate) fn save_command(&mut self, command: &OutboundCommand) {
        self.commands.insert(command.id.clone(), command.clone());
    }

    pub(crate) fn remove_command(&mut self, id: &CommandId) {
        self.commands.remove(id);
    }

    pub(crate) fn load_commands(&self) -> Vec<OutboundCommand> {
        let mut commands: Vec<OutboundCommand> = self.commands.values().cloned().collect();
        commands.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        commands
    }
}
