// Agent Gateway Server
//
// Accepts agent WebSocket connections, dispatches queued commands and ingests
// telemetry. Configured through AGENT_GATEWAY_* environment variables;
// listens on 127.0.0.1:30480 by default.

use std::sync::Arc;

use anyhow::{Context, Result};
use kodegen_agent_gateway::{
    AgentHub, GatewayOptions, JsonFileStore, MemoryStore, OperationStore,
    StaticKeyAuthenticator, start_server,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = GatewayOptions::from_env().context("Failed to load gateway options")?;
    let auth = StaticKeyAuthenticator::from_env().context("Failed to load agent keys")?;
    if auth.is_empty() {
        log::warn!("No agent keys configured; every connection will be rejected");
    } else {
        log::info!("Loaded keys for {} agent(s)", auth.len());
    }

    let store: Arc<dyn OperationStore> = match &options.store_path {
        Some(path) => Arc::new(
            JsonFileStore::open(path)
                .await
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
        ),
        None => {
            log::info!("Using in-memory operation store");
            Arc::new(MemoryStore::new())
        }
    };

    let hub = AgentHub::new(options.clone(), Arc::new(auth), store).await?;
    hub.start();

    let server = start_server(options.bind_addr, Arc::clone(&hub)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    log::info!("Shutting down");

    server.shutdown().await?;
    hub.shutdown().await;
    Ok(())
}
