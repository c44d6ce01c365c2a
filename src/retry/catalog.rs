//! Mapping from operation types to command payloads

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::types::commands::{CommandPayload, ROLLBACK_AGENT, SYSTEM_UPDATE, UPDATE_AGENT};
use crate::types::operations::PendingOperation;

/// Builds the command that carries out an operation
pub type CommandBuilder = Arc<dyn Fn(&PendingOperation) -> Result<CommandPayload> + Send + Sync>;

/// Registry of operation types the retry coordinator knows how to redeliver
#[derive(Clone)]
pub struct OperationCatalog {
    builders: HashMap<String, CommandBuilder>,
}

impl std::fmt::Debug for OperationCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.builders.keys().collect();
        types.sort();
        f.debug_struct("OperationCatalog").field("types", &types).finish()
    }
}

impl Default for OperationCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationCatalog {
    /// Catalog with the agent-maintenance operations built in
    #[must_use]
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        catalog.register(UPDATE_AGENT, |_| Ok(CommandPayload::UpdateAgent));
        catalog.register(ROLLBACK_AGENT, |op| {
            let commit_id = op
                .params
                .get("commitId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    GatewayError::invalid_operation(op.id.as_str(), "params.commitId is required")
                })?;
            Ok(CommandPayload::RollbackAgent {
                commit_id: commit_id.to_string(),
            })
        });
        catalog.register(SYSTEM_UPDATE, |op| {
            let priority = op
                .params
                .get("priority")
                .and_then(Value::as_i64)
                .and_then(|p| i32::try_from(p).ok());
            Ok(CommandPayload::SystemUpdate { priority })
        });
        catalog
    }

    /// Catalog with nothing registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register (or replace) the builder for `operation_type`
    pub fn register<F>(&mut self, operation_type: impl Into<String>, builder: F)
    where
        F: Fn(&PendingOperation) -> Result<CommandPayload> + Send + Sync + 'static,
    {
        self.builders.insert(operation_type.into(), Arc::new(builder));
    }

    /// Register `operation_type` as a passthrough command.
    ///
    /// The command's `type` is the operation type; its fields are the
    /// operation's `params` plus `domain` when set.
    pub fn register_passthrough(&mut self, operation_type: impl Into<String>) {
        let kind = operation_type.into();
        let command_kind = kind.clone();
        self.register(kind, move |op| {
            let mut fields = match &op.params {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            if let Some(domain) = &op.domain {
                fields.insert("domain".to_string(), Value::String(domain.clone()));
            }
            Ok(CommandPayload::other(command_kind.clone(), Value::Object(fields)))
        });
    }

    /// Whether `operation_type` has a builder
    #[must_use]
    pub fn contains(&self, operation_type: &str) -> bool {
        self.builders.contains_key(operation_type)
    }

    /// Build the command for `operation`
    ///
    /// # Errors
    /// Returns `GatewayError::UnknownOperation` for an unregistered type, or
    /// whatever the builder reports for a malformed row
    pub fn resolve(&self, operation: &PendingOperation) -> Result<CommandPayload> {
        let builder = self
            .builders
            .get(&operation.operation_type)
            .ok_or_else(|| GatewayError::unknown_operation(&operation.operation_type))?;
        builder(operation)
    }
}
