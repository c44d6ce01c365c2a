//! Broadcast channel carrying [`AgentEvent`]s to the business layer

use tokio::sync::broadcast;

use crate::types::events::AgentEvent;

/// Cloneable sender side of the event stream
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow receiver
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no receivers is not an error.
    pub fn emit(&self, event: AgentEvent) {
        log::debug!("Event {} for agent {}", event.name(), event.agent_id());
        let _ = self.tx.send(event);
    }

    /// New receiver seeing every event emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
