//! HTTP surface of the gateway
//!
//! - `GET /ws/agent` upgrades to the agent socket
//! - `GET /stats` returns [`GatewayStats`](crate::GatewayStats)
//! - `GET /agents` lists session snapshots
//! - `GET /agents/{id}` returns one session snapshot

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hub::AgentHub;
use crate::message::MAX_FRAME_BYTES;
use crate::transport::websocket::{CredentialQuery, Credentials, serve_agent};
use crate::types::identifiers::AgentId;

/// Build the router over `hub`
pub fn router(hub: Arc<AgentHub>) -> Router {
    Router::new()
        .route("/ws/agent", get(agent_socket))
        .route("/stats", get(stats))
        .route("/agents", get(list_agents))
        .route("/agents/{id}", get(agent_session))
        .with_state(hub)
}

async fn agent_socket(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<AgentHub>>,
    headers: HeaderMap,
    Query(query): Query<CredentialQuery>,
) -> impl IntoResponse {
    let credentials = Credentials::extract(&headers, query);
    let gateway = Arc::clone(hub.gateway());
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| serve_agent(socket, gateway, credentials))
}

async fn stats(State(hub): State<Arc<AgentHub>>) -> impl IntoResponse {
    Json(hub.stats())
}

async fn list_agents(State(hub): State<Arc<AgentHub>>) -> impl IntoResponse {
    Json(hub.sessions())
}

async fn agent_session(
    State(hub): State<Arc<AgentHub>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match hub.session(&AgentId::new(id)) {
        Some(session) => Json(session).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Handle to a running HTTP server
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// Address the server is listening on
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests
    ///
    /// # Errors
    /// Returns error if the server task failed or panicked
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.task.await??;
        Ok(())
    }
}

/// Start the gateway HTTP server
///
/// This function is non-blocking - the server runs in a background task.
///
/// # Arguments
/// * `addr` - Socket address to bind to (e.g., "127.0.0.1:30480")
/// * `hub` - Hub the socket handlers feed
///
/// # Returns
/// ServerHandle for graceful shutdown, or error if binding fails
pub async fn start_server(addr: SocketAddr, hub: Arc<AgentHub>) -> anyhow::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    start_server_with_listener(listener, hub)
}

/// Start the gateway HTTP server on a pre-bound listener
///
/// # Arguments
/// * `listener` - Pre-bound TcpListener (port already reserved)
/// * `hub` - Hub the socket handlers feed
///
/// # Returns
/// ServerHandle for graceful shutdown, or error if the listener has no address
pub fn start_server_with_listener(
    listener: tokio::net::TcpListener,
    hub: Arc<AgentHub>,
) -> anyhow::Result<ServerHandle> {
    let local_addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let app = router(hub);

    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
    });

    log::info!("Agent gateway listening on {local_addr}");
    Ok(ServerHandle {
        local_addr,
        cancel,
        task,
    })
}
