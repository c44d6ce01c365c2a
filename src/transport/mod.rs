//! Transport layer for talking to connected agents
//!
//! Each live agent connection is represented by an [`AgentLink`]: the sending
//! half of an unbounded channel drained by the socket's writer task. Everything
//! above the transport layer writes frames through the link and never touches
//! the socket itself.

pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::types::identifiers::ConnectionId;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Live handle to one agent connection
#[derive(Debug, Clone)]
pub struct AgentLink {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl AgentLink {
    /// Wrap the sending half of a connection's outbound channel
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            connection_id: ConnectionId::new(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed)),
            tx,
        }
    }

    /// Create a link together with the receiver its frames arrive on.
    ///
    /// The socket layer drains the receiver into the wire; tests read it directly.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Unique ID of the physical connection behind this link
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Whether the writer side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a text frame for the socket writer
    ///
    /// # Errors
    /// Returns `GatewayError::TransportUnavailable` if the writer has gone away
    pub fn send(&self, frame: String) -> Result<()> {
        self.tx.send(frame).map_err(|_| {
            GatewayError::transport_unavailable(format!(
                "connection {} is closed",
                self.connection_id.get()
            ))
        })
    }
}
