//! JSON file backed operation store

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{OperationStore, StoreFuture, StoreState};
use crate::error::{GatewayError, Result};
use crate::types::commands::OutboundCommand;
use crate::types::identifiers::{AgentId, CommandId, OperationId};
use crate::types::operations::{AgentConnectivity, OperationStatus, PendingOperation};

/// Operation store that rewrites a JSON snapshot after every mutation.
///
/// The snapshot is written to a sibling temp file and renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading the existing snapshot if there is one
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed, or the
    /// parent directory cannot be created
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => StoreState::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                GatewayError::store(format!("Failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(GatewayError::Io(e)),
        };

        log::info!("Opened operation store at {}", path.display());
        Ok(Self {
            path,
            state: Mutex::new(state),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let state = self.state.lock();
            serde_json::to_vec_pretty(&*state)?
        };
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, snapshot).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn mutate<'a, T: Send + 'a>(
        &'a self,
        f: impl FnOnce(&mut StoreState) -> Result<T> + Send + 'a,
    ) -> StoreFuture<'a, T> {
        Box::pin(async move {
            let out = {
                let mut state = self.state.lock();
                f(&mut state)?
            };
            self.persist().await?;
            Ok(out)
        })
    }

    fn read<'a, T: Send + 'a>(&'a self, f: impl FnOnce(&StoreState) -> T) -> StoreFuture<'a, T> {
        let out = f(&self.state.lock());
        Box::pin(std::future::ready(Ok(out)))
    }
}

impl OperationStore for JsonFileStore {
    fn create_operation(&self, operation: PendingOperation) -> StoreFuture<'_, ()> {
        self.mutate(move |state| state.create_operation(operation))
    }

    fn get_operation<'a>(
        &'a self,
        id: &'a OperationId,
    ) -> StoreFuture<'a, Option<PendingOperation>> {
        self.read(|state| state.get_operation(id))
    }

    fn list_pending<'a>(
        &'a self,
        agent_id: Option<&'a AgentId>,
    ) -> StoreFuture<'a, Vec<PendingOperation>> {
        self.read(|state| state.list_pending(agent_id))
    }

    fn record_retry<'a>(
        &'a self,
        id: &'a OperationId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, PendingOperation> {
        self.mutate(move |state| state.record_retry(id, at))
    }

    fn set_status<'a>(
        &'a self,
        id: &'a OperationId,
        status: OperationStatus,
    ) -> StoreFuture<'a, ()> {
        self.mutate(move |state| state.set_status(id, status))
    }

    fn set_connectivity<'a>(
        &'a self,
        agent_id: &'a AgentId,
        connectivity: AgentConnectivity,
    ) -> StoreFuture<'a, ()> {
        self.mutate(move |state| {
            state.set_connectivity(agent_id, connectivity);
            Ok(())
        })
    }

    fn connectivity<'a>(
        &'a self,
        agent_id: &'a AgentId,
    ) -> StoreFuture<'a, Option<AgentConnectivity>> {
        self.read(|state| state.connectivity(agent_id))
    }

    fn save_command<'a>(&'a self, command: &'a OutboundCommand) -> StoreFuture<'a, ()> {
        self.mutate(move |state| {
            state.save_command(command);
            Ok(())
        })
    }

    fn remove_command<'a>(&'a self, id: &'a CommandId) -> StoreFuture<'a, ()> {
        self.mutate(move |state| {
            state.remove_command(id);
            Ok(())
        })
    }

    fn load_commands(&self) -> StoreFuture<'_, Vec<OutboundCommand>> {
        self.read(StoreState::load_commands)
    }
}
