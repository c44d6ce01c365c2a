//! Tests for the wired hub and its processing loops

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestAgent, hub_with, init_logging};
use futures::StreamExt;
use kodegen_agent_gateway::{
    AgentEvent, AgentHub, CommandPayload, GatewayOptions, MemoryStore, OperationStore,
    PendingOperation, SessionState,
};
use serde_json::json;

fn fast_options() -> GatewayOptions {
    GatewayOptions::builder()
        .inbound_interval(Duration::from_millis(100))
        .dispatch_interval(Duration::from_secs(1))
        .timeout_sweep_interval(Duration::from_secs(10))
        .retry_sweep_interval(Duration::from_secs(5))
        .command_timeout(Duration::from_secs(30))
        .build()
}

async fn started_hub() -> Arc<AgentHub> {
    let hub = hub_with(fast_options(), Arc::new(MemoryStore::new())).await;
    hub.start();
    hub.start();
    hub
}

#[tokio::test(start_paused = true)]
async fn test_loops_dispatch_and_complete_commands() {
    init_logging();
    let hub = started_hub().await;
    let mut agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::other("deploy", json!({})), 0)
        .await;
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let frames = agent.sent();
    assert_eq!(frames.len(), 1);
    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Busy);

    agent.report(
        &hub,
        json!({"type": "command_result", "agentId": "agent-1", "status": "done", "commandId": frames[0]["commandId"]}),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Online);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_loop_frees_silent_agent() {
    init_logging();
    let hub = started_hub().await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::other("deploy", json!({})), 0)
        .await;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Busy);

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Online);

    let mut timed_out = 0;
    while let Ok(event) = events.try_recv() {
        if let AgentEvent::CommandTimeout(timeout) = event {
            assert!(timeout.elapsed_time_ms >= 30_000);
            timed_out += 1;
        }
    }
    assert_eq!(timed_out, 1);

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_loop_redelivers_pending_operations() {
    init_logging();
    let hub = started_hub().await;
    let mut agent = TestAgent::connect(&hub, "agent-1").await;

    let operation = PendingOperation::new(agent.id.clone(), "system_update", None, json!({}));
    let operation_id = operation.id.clone();
    hub.store().create_operation(operation).await.unwrap();

    tokio::time::sleep(Duration::from_secs(7)).await;

    let frames = agent.sent();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["operationId"], operation_id.as_str());

    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_dispatch() {
    init_logging();
    let hub = started_hub().await;
    let mut agent = TestAgent::connect(&hub, "agent-1").await;
    hub.shutdown().await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(agent.sent().is_empty());
    assert_eq!(hub.session(&agent.id).unwrap().queue_length, 1);
}

#[tokio::test]
async fn test_event_stream_yields_lifecycle_events() {
    init_logging();
    let hub = hub_with(fast_options(), Arc::new(MemoryStore::new())).await;
    let mut stream = Box::pin(hub.events());

    let agent = TestAgent::connect(&hub, "agent-1").await;
    agent.disconnect(&hub).await;

    let first = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, AgentEvent::AgentConnected { .. }));
    assert!(matches!(second, AgentEvent::AgentDisconnected { .. }));
    assert_eq!(second.agent_id(), &agent.id);
}

#[tokio::test]
async fn test_stats_cover_both_queues() {
    init_logging();
    let hub = hub_with(fast_options(), Arc::new(MemoryStore::new())).await;
    let agent = TestAgent::connect(&hub, "agent-1").await;

    agent.report(&hub, json!({"type": "heartbeat", "agentId": "agent-1", "sequence": 1}));
    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();

    let stats = hub.stats();
    assert_eq!(stats.inbound.queue_length, 1);
    assert_eq!(stats.inbound.batch_size, 50);
    assert_eq!(stats.outbound.total_queue_length, 1);
    assert_eq!(stats.outbound.busy_agents, 1);
    assert_eq!(stats.outbound.total_agents, 1);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["outbound"]["busyAgents"], 1);
    assert_eq!(json["inbound"]["queueLength"], 1);
}
