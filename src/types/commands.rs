//! Outbound command types
//!
//! Commands travel gateway → agent as JSON objects tagged by `type`. The three
//! agent-maintenance commands have dedicated variants; anything else is carried
//! through untouched as [`CommandPayload::Other`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::identifiers::{AgentId, CommandId, OperationId};
use crate::error::{GatewayError, Result};

/// Wire type of the self-update command
pub const UPDATE_AGENT: &str = "update_agent";
/// Wire type of the rollback command
pub const ROLLBACK_AGENT: &str = "rollback_agent";
/// Wire type of the host system update command
pub const SYSTEM_UPDATE: &str = "system_update";

// ============================================================================
// Command Payload
// ============================================================================

/// Typed command payload
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// Replace the agent binary with the latest release and restart
    UpdateAgent,
    /// Reinstall the agent at a given commit and restart
    RollbackAgent {
        /// Commit to roll back to
        commit_id: String,
    },
    /// Update host packages
    SystemUpdate {
        /// Optional urgency hint forwarded to the agent
        priority: Option<i32>,
    },
    /// Any other command, forwarded verbatim
    Other {
        /// Wire `type`
        kind: String,
        /// Remaining fields
        fields: Map<String, Value>,
    },
}

impl CommandPayload {
    /// Build a passthrough command from a `type` and an object of fields.
    ///
    /// Non-object `fields` values are ignored.
    pub fn other(kind: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::Other {
            kind: kind.into(),
            fields,
        }
    }

    /// Wire `type` of the command
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::UpdateAgent => UPDATE_AGENT,
            Self::RollbackAgent { .. } => ROLLBACK_AGENT,
            Self::SystemUpdate { .. } => SYSTEM_UPDATE,
            Self::Other { kind, .. } => kind,
        }
    }

    /// Whether executing the command restarts the agent process.
    ///
    /// For these commands the agent dropping its connection and coming back is
    /// the expected outcome rather than a failure.
    #[must_use]
    pub fn is_self_update(&self) -> bool {
        match self {
            Self::UpdateAgent | Self::RollbackAgent { .. } => true,
            Self::SystemUpdate { .. } => false,
            Self::Other { kind, .. } => kind.contains("restart"),
        }
    }

    /// Convert to the JSON object sent on the wire
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".to_string(), Value::String(self.kind().to_string()));
        match self {
            Self::UpdateAgent => {}
            Self::RollbackAgent { commit_id } => {
                object.insert("commitId".to_string(), Value::String(commit_id.clone()));
            }
            Self::SystemUpdate { priority } => {
                if let Some(priority) = priority {
                    object.insert("priority".to_string(), Value::from(*priority));
                }
            }
            Self::Other { fields, .. } => {
                for (key, value) in fields {
                    if key != "type" {
                        object.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Value::Object(object)
    }

    /// Parse a command from its JSON form
    ///
    /// # Errors
    /// Returns error if the value is not an object with a string `type`, or a
    /// `rollback_agent` command lacks `commitId`
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(GatewayError::message_parse(
                "command must be a JSON object",
                Some(value),
            ));
        };

        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            other => {
                return Err(GatewayError::message_parse(
                    "command is missing a string `type`",
                    other,
                ));
            }
        };

        match kind.as_str() {
            UPDATE_AGENT => Ok(Self::UpdateAgent),
            ROLLBACK_AGENT => match object.remove("commitId") {
                Some(Value::String(commit_id)) => Ok(Self::RollbackAgent { commit_id }),
                _ => Err(GatewayError::message_parse(
                    "rollback_agent requires a string `commitId`",
                    Some(Value::Object(object)),
                )),
            },
            SYSTEM_UPDATE => {
                let priority = object
                    .get("priority")
                    .and_then(Value::as_i64)
                    .and_then(|p| i32::try_from(p).ok());
                Ok(Self::SystemUpdate { priority })
            }
            _ => Ok(Self::Other {
                kind,
                fields: object,
            }),
        }
    }
}

impl Serialize for CommandPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CommandPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Outbound Command
// ============================================================================

/// Lifecycle of an outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Waiting in the agent's backlog
    Queued,
    /// Sent; the agent is busy with it
    Dispatched,
    /// A terminal message freed the agent
    Acknowledged,
    /// Freed by the timeout sweep
    TimedOut,
}

/// A command addressed to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCommand {
    /// Correlation ID, sent as `commandId`
    pub id: CommandId,
    /// Target agent
    pub agent_id: AgentId,
    /// What to run
    pub payload: CommandPayload,
    /// Higher is more urgent
    pub priority: i32,
    /// When the command entered the backlog
    pub enqueued_at: DateTime<Utc>,
    /// When the command was sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Current lifecycle status
    pub status: CommandStatus,
    /// Durable operation this command redelivers, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
}

impl OutboundCommand {
    /// Create a queued command with a fresh ID
    #[must_use]
    pub fn new(agent_id: AgentId, payload: CommandPayload, priority: i32) -> Self {
        Self {
            id: CommandId::generate(),
            agent_id,
            payload,
            priority,
            enqueued_at: Utc::now(),
            dispatched_at: None,
            status: CommandStatus::Queued,
            operation_id: None,
        }
    }

    /// Tag the command as a redelivery of a durable operation
    #[must_use]
    pub fn for_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// Wire `type` of the payload
    #[must_use]
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// JSON frame sent to the agent: the payload plus correlation fields
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut frame = self.payload.to_value();
        if let Value::Object(object) = &mut frame {
            object.insert(
                "commandId".to_string(),
                Value::String(self.id.as_str().to_string()),
            );
            if let Some(operation_id) = &self.operation_id {
                object.insert(
                    "operationId".to_string(),
                    Value::String(operation_id.as_str().to_string()),
                );
            }
        }
        frame
    }
}
