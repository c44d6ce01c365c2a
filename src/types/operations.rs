//! Durable operation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identifiers::{AgentId, OperationId};

/// Status of a durable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Not yet confirmed by the agent
    Pending,
    /// Agent reported success
    Completed,
    /// Agent reported failure
    Failed,
}

/// A long-running operation that must survive process restarts and agent outages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Operation ID
    pub id: OperationId,
    /// Operation type, resolved to a command by the operation catalog
    pub operation_type: String,
    /// Target domain/site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Agent that executes the operation
    pub agent_id: AgentId,
    /// Extra command fields
    #[serde(default)]
    pub params: Value,
    /// Dispatch priority of redelivered commands
    #[serde(default)]
    pub priority: i32,
    /// Number of redeliveries so far
    pub retry_count: u32,
    /// When the last redelivery happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: OperationStatus,
    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl PendingOperation {
    /// Create a new pending row
    pub fn new(
        agent_id: AgentId,
        operation_type: impl Into<String>,
        domain: Option<String>,
        params: Value,
    ) -> Self {
        Self {
            id: OperationId::generate(),
            operation_type: operation_type.into(),
            domain,
            agent_id,
            params,
            priority: 0,
            retry_count: 0,
            last_retry_at: None,
            status: OperationStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Set the dispatch priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the row still awaits a terminal status
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }
}

/// Persisted connectivity of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConnectivity {
    /// Whether a live connection exists
    pub online: bool,
    /// When `online` last changed
    pub last_change: DateTime<Utc>,
}
