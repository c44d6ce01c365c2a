//! Error types for the agent gateway

use thiserror::Error;

/// Main error type for the agent gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Agent credentials were rejected by the authentication collaborator
    #[error("Authentication failed for agent {0}")]
    AuthenticationFailure(String),

    /// Dispatch attempted against a closed or missing agent socket
    #[error("Transport unavailable for agent {0}")]
    TransportUnavailable(String),

    /// A dispatched command produced no terminal signal within the timeout window
    #[error("Command {command_id} timed out after {elapsed_ms}ms")]
    CommandTimeout {
        /// Command that timed out
        command_id: String,
        /// Time the command had been running
        elapsed_ms: u64,
    },

    /// Consecutive failures in a processing loop exceeded the breaker threshold
    #[error("Processing overload in {loop_name}: {consecutive} consecutive failures")]
    ProcessingOverload {
        /// Name of the paused loop
        loop_name: String,
        /// Failures observed before the pause
        consecutive: u32,
    },

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),

    /// Operation type with no registered command mapping
    #[error("Unknown operation type: {0}")]
    UnknownOperation(String),

    /// Operation row that cannot be turned into a command
    #[error("Invalid operation {operation_id}: {message}")]
    InvalidOperation {
        /// Offending operation
        operation_id: String,
        /// What is wrong with it
        message: String,
    },

    /// Message parse error with optional raw data
    #[error("Message parse error: {message}")]
    MessageParse {
        /// Error message
        message: String,
        /// Raw message data that failed to parse
        data: Option<serde_json::Value>,
    },

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Create an authentication failure
    pub fn authentication(agent_id: impl Into<String>) -> Self {
        Self::AuthenticationFailure(agent_id.into())
    }

    /// Create a transport-unavailable error
    pub fn transport_unavailable(agent_id: impl Into<String>) -> Self {
        Self::TransportUnavailable(agent_id.into())
    }

    /// Create a command timeout error
    pub fn command_timeout(command_id: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::CommandTimeout {
            command_id: command_id.into(),
            elapsed_ms,
        }
    }

    /// Create a processing overload error
    pub fn processing_overload(loop_name: impl Into<String>, consecutive: u32) -> Self {
        Self::ProcessingOverload {
            loop_name: loop_name.into(),
            consecutive,
        }
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an unknown operation error
    pub fn unknown_operation(kind: impl Into<String>) -> Self {
        Self::UnknownOperation(kind.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(operation_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidOperation {
            operation_id: operation_id.into(),
            message: msg.into(),
        }
    }

    /// Create a message parse error
    pub fn message_parse(msg: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::MessageParse {
            message: msg.into(),
            data,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the error is expected to clear up on a later attempt
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Io(_) | Self::TransportUnavailable(_)
        )
    }
}
