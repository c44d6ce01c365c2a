//! Events emitted to the business layer
//!
//! The closed set of things the gateway reports. Consumers receive them from
//! [`crate::AgentHub::subscribe`] and match exhaustively.

use serde::{Deserialize, Serialize};

use super::commands::OutboundCommand;
use super::identifiers::AgentId;
use super::messages::AgentMessage;

/// Outcome reported with [`AgentEvent::AgentUpdated`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Update applied
    Success,
    /// Update failed
    Failed,
}

/// Payload of [`AgentEvent::CommandTimeout`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTimeout {
    /// Agent that was freed
    pub agent_id: AgentId,
    /// Wire `type` of the command
    pub original_type: String,
    /// Human readable summary
    pub message: String,
    /// The command as it was dispatched
    pub original_message: OutboundCommand,
    /// How long the command had been running
    pub elapsed_time_ms: u64,
    /// Self-update commands restart the agent, so silence is the expected outcome
    pub likely_succeeded: bool,
}

/// Event emitted by the gateway core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// An agent authenticated and its session is online
    AgentConnected {
        /// Agent
        agent_id: AgentId,
    },
    /// An agent's live connection closed
    AgentDisconnected {
        /// Agent
        agent_id: AgentId,
    },
    /// A normalized inbound message, emitted once per batch entry
    AgentMessage(AgentMessage),
    /// A dispatched command hit the timeout and its agent was freed
    CommandTimeout(CommandTimeout),
    /// A command could not be delivered
    CommandError {
        /// Agent
        agent_id: AgentId,
        /// What went wrong
        error: String,
        /// Command that was dropped
        command: OutboundCommand,
    },
    /// A self-update finished
    AgentUpdated {
        /// Agent
        agent_id: AgentId,
        /// Outcome
        status: UpdateStatus,
        /// How the outcome was determined
        details: String,
    },
}

impl AgentEvent {
    /// Agent the event concerns
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::AgentConnected { agent_id }
            | Self::AgentDisconnected { agent_id }
            | Self::CommandError { agent_id, .. }
            | Self::AgentUpdated { agent_id, .. } => agent_id,
            Self::AgentMessage(message) => &message.agent_id,
            Self::CommandTimeout(timeout) => &timeout.agent_id,
        }
    }

    /// Short name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentConnected { .. } => "agent_connected",
            Self::AgentDisconnected { .. } => "agent_disconnected",
            Self::AgentMessage(_) => "agent_message",
            Self::CommandTimeout(_) => "command_timeout",
            Self::CommandError { .. } => "command_error",
            Self::AgentUpdated { .. } => "agent_updated",
        }
    }
}
