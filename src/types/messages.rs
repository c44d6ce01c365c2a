//! Agent → gateway message types
//!
//! [`InboundMessage`] is the wire schema. It carries diagnostic fields
//! (`messageId`, `sentAt`, `sequence`) used only for deduplication and logging;
//! [`AgentMessage`] is the normalized form handed to consumers with those
//! fields stripped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identifiers::{AgentId, CommandId, OperationId};

/// `type` of a free-standing error report
pub const TYPE_ERROR: &str = "error";
/// `type` of an operation progress/result report
pub const TYPE_OPERATION_STATUS: &str = "operation_status";
/// `type` of a generic command result
pub const TYPE_COMMAND_RESULT: &str = "command_result";
/// `type` an agent sends after a successful self-update
pub const TYPE_UPDATE_SUCCESS: &str = "update_success";
/// `type` an agent sends when a self-update failed
pub const TYPE_UPDATE_FAILED: &str = "update_failed";

const SUCCESS_STATUSES: &[&str] = &["completed", "success", "succeeded", "done"];
const FAILURE_STATUSES: &[&str] = &["failed", "failure", "error"];

// ============================================================================
// Wire schema
// ============================================================================

/// Message as received from an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Sending agent, as claimed by the agent
    pub agent_id: AgentId,
    /// Operation or command status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Operation type the message reports on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Echoed durable operation ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    /// Echoed command ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    /// Target domain/site of the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Error description (string or structured)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Command output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Client-assigned message ID (diagnostic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    /// Client send time (diagnostic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<Value>,
    /// Client sequence number (diagnostic, any JSON value)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Value>,
    /// Any other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inbound processing priority derived from message shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Heartbeats, metrics, everything else
    Low,
    /// Operation status reports
    Medium,
    /// Errors
    High,
}

impl InboundMessage {
    /// Whether the message reports an error
    #[must_use]
    pub fn is_error_class(&self) -> bool {
        self.kind == TYPE_ERROR || self.error.as_ref().is_some_and(|e| !e.is_null())
    }

    /// Whether the message reports on an operation or command
    #[must_use]
    pub fn is_operation_status(&self) -> bool {
        self.operation.is_some()
            || self.operation_id.is_some()
            || self.kind == TYPE_OPERATION_STATUS
            || self.kind == TYPE_COMMAND_RESULT
    }

    /// Priority derived from the message shape
    #[must_use]
    pub fn derive_priority(&self) -> MessagePriority {
        if self.is_error_class() {
            MessagePriority::High
        } else if self.is_operation_status() {
            MessagePriority::Medium
        } else {
            MessagePriority::Low
        }
    }

    /// Deduplication key for this message from `agent_id`.
    ///
    /// Uses the explicit `messageId` when present, otherwise `sequence`, then
    /// `sentAt`. Null values count as absent. Returns `None` when the message
    /// carries none of them.
    #[must_use]
    pub fn dedup_key(&self, agent_id: &AgentId) -> Option<String> {
        if let Some(id) = present(self.message_id.as_ref()) {
            return Some(format!("{agent_id}:id:{}", key_fragment(id)));
        }
        if let Some(sequence) = present(self.sequence.as_ref()) {
            return Some(format!("{agent_id}:seq:{}", key_fragment(sequence)));
        }
        present(self.sent_at.as_ref())
            .map(|sent_at| format!("{agent_id}:at:{}:{}", self.kind, key_fragment(sent_at)))
    }

    /// Strip diagnostic fields and stamp the receiving agent
    #[must_use]
    pub fn normalize(self, agent_id: AgentId, received_at: DateTime<Utc>) -> AgentMessage {
        AgentMessage {
            kind: self.kind,
            agent_id,
            status: self.status,
            operation: self.operation,
            operation_id: self.operation_id,
            command_id: self.command_id,
            domain: self.domain,
            error: self.error,
            output: self.output,
            extra: self.extra,
            received_at,
        }
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn key_fragment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Normalized message
// ============================================================================

/// What a terminal message says about the work it reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Operation or command finished successfully
    Completed,
    /// Operation or command failed
    Failed,
    /// Free-standing error report
    Error,
    /// Agent confirmed a successful self-update
    UpdateSucceeded,
    /// Agent reported a failed self-update
    UpdateFailed,
}

/// Normalized message forwarded to consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Authenticated agent the message arrived from
    pub agent_id: AgentId,
    /// Status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Operation type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Echoed operation ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    /// Echoed command ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    /// Domain/site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// When the gateway received the message
    pub received_at: DateTime<Utc>,
}

impl AgentMessage {
    fn status_in(&self, set: &[&str]) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| set.iter().any(|s| s.eq_ignore_ascii_case(status)))
    }

    /// Classify the message as terminal, or `None` for progress/telemetry
    #[must_use]
    pub fn completion(&self) -> Option<Completion> {
        match self.kind.as_str() {
            TYPE_UPDATE_SUCCESS => return Some(Completion::UpdateSucceeded),
            TYPE_UPDATE_FAILED => return Some(Completion::UpdateFailed),
            _ => {}
        }

        let reports_work = self.operation.is_some()
            || self.operation_id.is_some()
            || self.command_id.is_some()
            || self.kind == TYPE_OPERATION_STATUS
            || self.kind == TYPE_COMMAND_RESULT;

        if reports_work {
            if self.status_in(SUCCESS_STATUSES) {
                return Some(Completion::Completed);
            }
            if self.status_in(FAILURE_STATUSES) || self.error.as_ref().is_some_and(|e| !e.is_null())
            {
                return Some(Completion::Failed);
            }
            return None;
        }

        if self.kind == TYPE_ERROR {
            return Some(Completion::Error);
        }
        None
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Tagged message waiting in the inbound buffer
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    /// Parsed message
    pub message: InboundMessage,
    /// Authenticated source agent
    pub agent_id: AgentId,
    /// Derived or caller-supplied priority
    pub priority: MessagePriority,
    /// Key checked against the recency window
    pub dedup_key: String,
    /// When the envelope entered the buffer
    pub enqueued_at: DateTime<Utc>,
    /// Arrival order, for stable sorting
    pub seq: u64,
}
