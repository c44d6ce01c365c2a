//! In-memory operation store

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{OperationStore, StoreFuture, StoreState};
use crate::types::commands::OutboundCommand;
use crate::types::identifiers::{AgentId, CommandId, OperationId};
use crate::types::operations::{AgentConnectivity, OperationStatus, PendingOperation};

/// Operation store held entirely in process memory.
///
/// Nothing survives a restart; use [`super::JsonFileStore`] when it must.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationStore for MemoryStore {
    fn create_operation(&self, operation: PendingOperation) -> StoreFuture<'_, ()> {
        let result = self.state.lock().create_operation(operation);
        Box::pin(std::future::ready(result))
    }

    fn get_operation<'a>(
        &'a self,
        id: &'a OperationId,
    ) -> StoreFuture<'a, Option<PendingOperation>> {
        let row = self.state.lock().get_operation(id);
        Box::pin(std::future::ready(Ok(row)))
    }

    fn list_pending<'a>(
        &'a self,
        agent_id: Option<&'a AgentId>,
    ) -> StoreFuture<'a, Vec<PendingOperation>> {
        let rows = self.state.lock().list_pending(agent_id);
        Box::pin(std::future::ready(Ok(rows)))
    }

    fn record_retry<'a>(
        &'a self,
        id: &'a OperationId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, PendingOperation> {
        let result = self.state.lock().record_retry(id, at);
        Box::pin(std::future::ready(result))
    }

    fn set_status<'a>(
        &'a self,
        id: &'a OperationId,
        status: OperationStatus,
    ) -> StoreFuture<'a, ()> {
        let result = self.state.lock().set_status(id, status);
        Box::pin(std::future::ready(result))
    }

    fn set_connectivity<'a>(
        &'a self,
        agent_id: &'a AgentId,
        connectivity: AgentConnectivity,
    ) -> StoreFuture<'a, ()> {
        self.state.lock().set_connectivity(agent_id, connectivity);
        Box::pin(std::future::ready(Ok(())))
    }

    fn connectivity<'a>(
        &'a self,
        agent_id: &'a AgentId,
    ) -> StoreFuture<'a, Option<AgentConnectivity>> {
        let row = self.state.lock().connectivity(agent_id);
        Box::pin(std::future::ready(Ok(row)))
    }

    fn save_command<'a>(&'a self, command: &'a OutboundCommand) -> StoreFuture<'a, ()> {
        self.state.lock().save_command(command);
        Box::pin(std::future::ready(Ok(())))
    }

    fn remove_command<'a>(&'a self, id: &'a CommandId) -> StoreFuture<'a, ()> {
        self.state.lock().remove_command(id);
        Box::pin(std::future::ready(Ok(())))
    }

    fn load_commands(&self) -> StoreFuture<'_, Vec<OutboundCommand>> {
        let commands = self.state.lock().load_commands();
        Box::pin(std::future::ready(Ok(commands)))
    }
}
