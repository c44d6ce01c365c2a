//! WebSocket socket handling for agent connections
//!
//! One [`serve_agent`] call owns one upgraded socket for its whole life:
//! authenticate, attach, pump frames both ways, and report the close.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::HeaderMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::AgentLink;
use crate::gateway::Gateway;
use crate::types::identifiers::AgentId;

/// Close code sent when the connection carries no agent identity
pub const CLOSE_MISSING_IDENTITY: u16 = 4000;
/// Close code sent when the agent key is rejected
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Header carrying the agent identity
pub const AGENT_ID_HEADER: &str = "x-agent-id";
/// Header carrying the agent key
pub const AGENT_KEY_HEADER: &str = "x-agent-key";

/// Credentials accepted as query parameters
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialQuery {
    /// Agent identity
    pub agent_id: Option<String>,
    /// Agent key
    pub agent_key: Option<String>,
}

/// Credentials presented by a connecting agent
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Agent identity, if any was presented
    pub agent_id: Option<String>,
    /// Agent key; empty when none was presented
    pub agent_key: String,
}

impl Credentials {
    /// Read credentials from headers, falling back to query parameters
    #[must_use]
    pub fn extract(headers: &HeaderMap, query: CredentialQuery) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let agent_id = header(AGENT_ID_HEADER)
            .or(query.agent_id)
            .filter(|id| !id.trim().is_empty());
        let agent_key = header(AGENT_KEY_HEADER)
            .or(query.agent_key)
            .unwrap_or_default();

        Self { agent_id, agent_key }
    }
}

type Sink = SplitSink<WebSocket, Message>;

async fn close_with(mut sink: Sink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        log::debug!("Failed to send close frame: {e}");
    }
}

/// Run one agent connection to completion
pub async fn serve_agent(socket: WebSocket, gateway: Arc<Gateway>, credentials: Credentials) {
    let (sink, mut stream) = socket.split();

    let Some(agent_id) = credentials.agent_id.map(AgentId::new) else {
        log::warn!("Rejecting agent connection without identity");
        close_with(sink, CLOSE_MISSING_IDENTITY, "missing agent identity").await;
        return;
    };

    let (link, mut outbound) = AgentLink::channel();
    let connection_id = match gateway
        .accept_connection(agent_id.clone(), &credentials.agent_key, link)
        .await
    {
        Ok(connection_id) => connection_id,
        Err(e) => {
            log::debug!("Closing connection of agent {agent_id}: {e}");
            close_with(sink, CLOSE_AUTH_FAILED, "authentication failed").await;
            return;
        }
    };

    let writer_agent = agent_id.clone();
    let writer = tokio::spawn(async move {
        let mut sink = sink;
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                log::debug!("Write to agent {writer_agent} failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(received) = stream.next().await {
        match received {
            Ok(Message::Text(text)) => {
                gateway.on_message(&agent_id, text.as_str());
            }
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    gateway.on_message(&agent_id, text);
                }
                Err(_) => log::warn!("Dropping non UTF-8 binary frame from agent {agent_id}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                log::debug!("Read from agent {agent_id} failed: {e}");
                break;
            }
        }
    }

    gateway.on_close(&agent_id, connection_id).await;
    writer.abort();
}
