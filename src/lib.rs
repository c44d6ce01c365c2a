//! # Agent Gateway
//!
//! Command dispatch and telemetry ingestion for a fleet of remote agents.
//! Agents hold a persistent WebSocket connection to the gateway; the business
//! layer queues commands for them and observes the outcome as a stream of
//! [`AgentEvent`]s.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use kodegen_agent_gateway::{
//!     AgentHub, CommandPayload, GatewayOptions, MemoryStore, StaticKeyAuthenticator,
//!     start_server,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = GatewayOptions::default();
//!     let auth = Arc::new(StaticKeyAuthenticator::new().with_key("web-01", "secret"));
//!     let hub = AgentHub::new(options.clone(), auth, Arc::new(MemoryStore::new())).await?;
//!     hub.start();
//!
//!     let server = start_server(options.bind_addr, Arc::clone(&hub)).await?;
//!     hub.enqueue_command("web-01".into(), CommandPayload::UpdateAgent, 5).await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! - [`gateway`]: authenticates connections and owns the live link per agent
//! - [`telemetry`]: deduplicating, prioritized inbound batches
//! - [`dispatch`]: per-agent backlogs with one command in flight, plus the timeout sweep
//! - [`retry`]: redelivery of durable operations on reconnect and on a sweep
//! - [`hub`]: wires the above together and runs the processing loops
//!
//! ## Completion
//!
//! Every dispatched command carries a `commandId`. An agent that echoes it in
//! a terminal message (`status: "completed"`, `"failed"`, an `error`, or an
//! `update_success`/`update_failed` report) frees itself for the next command.
//! Messages without the ID are classified by shape. A command that never
//! completes is freed by the timeout sweep.
//!
//! ## Wire format
//!
//! Agent → gateway:
//!
//! ```json
//! {"type": "operation_status", "agentId": "web-01", "status": "completed",
//!  "operation": "provision_site", "domain": "example.com", "commandId": "…",
//!  "messageId": "m-17"}
//! ```
//!
//! Gateway → agent:
//!
//! ```json
//! {"type": "rollback_agent", "commitId": "abc", "commandId": "…"}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod dispatch;
pub mod error;
mod flag;
pub mod gateway;
pub mod hub;
pub mod message;
pub mod registry;
pub mod retry;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use auth::{Authenticator, StaticKeyAuthenticator};
pub use dispatch::CommandQueue;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use hub::{AgentHub, BreakerState, CircuitBreaker, EventBus};
pub use message::{parse_frame, parse_message};
pub use registry::FleetRegistry;
pub use retry::{OperationCatalog, RetryCoordinator};
pub use server::{ServerHandle, router, start_server, start_server_with_listener};
pub use store::{JsonFileStore, MemoryStore, OperationStore};
pub use telemetry::{DedupWindow, TelemeterQueue};
pub use transport::AgentLink;

// Re-export type submodules for flat public API
pub use types::commands::{CommandPayload, CommandStatus, OutboundCommand};
pub use types::events::{AgentEvent, CommandTimeout, UpdateStatus};
pub use types::identifiers::{AgentId, CommandId, ConnectionId, OperationId};
pub use types::messages::{
    AgentMessage, Completion, InboundEnvelope, InboundMessage, MessagePriority,
};
pub use types::operations::{AgentConnectivity, OperationStatus, PendingOperation};
pub use types::options::{GatewayOptions, GatewayOptionsBuilder};
pub use types::session::{AgentSessionInfo, SessionState};
pub use types::stats::{AgentQueueStats, GatewayStats, InboundStats, OutboundStats};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
