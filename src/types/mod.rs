//! Type definitions for the agent gateway
//!
//! This module contains the type definitions used throughout the crate,
//! organized into logical submodules:
//!
//! - [`identifiers`] - Type-safe ID wrappers (`AgentId`, `CommandId`, `OperationId`)
//! - [`commands`] - Outbound command payloads and lifecycle
//! - [`messages`] - Inbound wire messages, normalized messages and envelopes
//! - [`events`] - Events emitted to the business layer
//! - [`operations`] - Durable pending operations
//! - [`session`] - Agent session lifecycle
//! - [`stats`] - Observability snapshots
//! - [`options`] - Gateway configuration

pub mod commands;
pub mod events;
pub mod identifiers;
pub mod messages;
pub mod operations;
pub mod options;
pub mod session;
pub mod stats;

// Re-export commonly used types
pub use commands::{CommandPayload, CommandStatus, OutboundCommand};
pub use events::{AgentEvent, CommandTimeout, UpdateStatus};
pub use identifiers::{AgentId, CommandId, ConnectionId, OperationId};
pub use messages::{AgentMessage, Completion, InboundEnvelope, InboundMessage, MessagePriority};
pub use operations::{AgentConnectivity, OperationStatus, PendingOperation};
pub use options::{GatewayOptions, GatewayOptionsBuilder};
pub use session::{AgentSessionInfo, SessionState};
pub use stats::{AgentQueueStats, GatewayStats, InboundStats, OutboundStats};
