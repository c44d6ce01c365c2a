//! Agent session lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifiers::AgentId;

/// Lifecycle state of an agent session.
///
/// `Connecting → Online → Busy → Online`, with any live state dropping to
/// `Disconnected` when the socket closes and `Disconnected → Connecting` when
/// the same identity connects again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Credentials not yet verified
    Connecting,
    /// Connected with no dispatched command
    Online,
    /// Connected with exactly one dispatched command
    Busy,
    /// No live connection; queued work is retained
    Disconnected,
}

impl SessionState {
    /// Whether a live connection exists
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Online | Self::Busy)
    }
}

/// Snapshot of one agent's session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionInfo {
    /// Agent
    pub agent_id: AgentId,
    /// Lifecycle state
    pub state: SessionState,
    /// Commands waiting in the backlog
    pub queue_length: usize,
    /// Wire type of the dispatched command, if busy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_command_type: Option<String>,
    /// How long the dispatched command has been running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_time_ms: Option<u64>,
    /// Last successful authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Last socket close
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
}
