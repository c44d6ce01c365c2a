//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kodegen_agent_gateway::{
    AgentEvent, AgentHub, AgentId, AgentLink, ConnectionId, GatewayOptions, MemoryStore,
    OperationStore, StaticKeyAuthenticator,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;

pub const KEY: &str = "secret";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn keys() -> Arc<StaticKeyAuthenticator> {
    Arc::new(
        StaticKeyAuthenticator::new()
            .with_key("agent-1", KEY)
            .with_key("agent-2", KEY)
            .with_key("agent-3", KEY),
    )
}

pub async fn hub_with(options: GatewayOptions, store: Arc<dyn OperationStore>) -> Arc<AgentHub> {
    AgentHub::new(options, keys(), store)
        .await
        .expect("hub should build")
}

pub async fn hub() -> Arc<AgentHub> {
    hub_with(GatewayOptions::default(), Arc::new(MemoryStore::new())).await
}

/// In-memory stand-in for a connected agent
pub struct TestAgent {
    pub id: AgentId,
    pub connection: ConnectionId,
    pub wire: mpsc::UnboundedReceiver<String>,
}

impl TestAgent {
    pub async fn connect(hub: &AgentHub, id: &str) -> Self {
        let (link, wire) = AgentLink::channel();
        let connection = hub
            .gateway()
            .accept_connection(AgentId::new(id), KEY, link)
            .await
            .expect("agent should authenticate");
        Self {
            id: AgentId::new(id),
            connection,
            wire,
        }
    }

    /// Every frame written to this agent so far
    pub fn sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.wire.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("frames are JSON"));
        }
        frames
    }

    /// Deliver a message as if the agent had sent it
    pub fn report(&self, hub: &AgentHub, message: Value) -> bool {
        hub.gateway().on_message(&self.id, &message.to_string())
    }

    pub async fn disconnect(&self, hub: &AgentHub) {
        hub.gateway().on_close(&self.id, self.connection).await;
    }
}

/// Every event currently buffered in `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    events
}

/// Poll `condition` for up to two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
