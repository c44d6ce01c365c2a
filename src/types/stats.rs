//! Observability snapshots

use serde::{Deserialize, Serialize};

use super::identifiers::AgentId;

/// Inbound telemeter queue state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundStats {
    /// Envelopes waiting for the next batch
    pub queue_length: usize,
    /// Maximum envelopes per batch
    pub batch_size: usize,
    /// Batch tick interval
    pub interval_ms: u64,
    /// Keys currently held by the dedup window
    pub dedup_entries: usize,
    /// Whether a batch is being processed right now
    pub processing: bool,
}

/// Per-agent outbound state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQueueStats {
    /// Agent
    pub agent_id: AgentId,
    /// Commands waiting
    pub queue_length: usize,
    /// Whether a command is dispatched
    pub is_busy: bool,
    /// Wire type of the dispatched command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_command_type: Option<String>,
    /// How long the dispatched command has been running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_time_ms: Option<u64>,
}

/// Outbound command queue state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundStats {
    /// Commands waiting across all agents
    pub total_queue_length: usize,
    /// Agents with a dispatched command
    pub busy_agents: usize,
    /// Agents known to the registry
    pub total_agents: usize,
    /// Agents that are busy or have a backlog, capped
    pub agents: Vec<AgentQueueStats>,
}

/// Combined snapshot served at `/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    /// Inbound side
    pub inbound: InboundStats,
    /// Outbound side
    pub outbound: OutboundStats,
}
