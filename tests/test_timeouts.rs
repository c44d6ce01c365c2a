//! Tests for the command timeout sweep and the reconnect heuristic
//!
//! Time is paused so elapsed durations are exact.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestAgent, drain_events, hub, hub_with, init_logging};
use kodegen_agent_gateway::{
    AgentEvent, CommandPayload, CommandTimeout, GatewayOptions, MemoryStore, SessionState,
    UpdateStatus,
};
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(300);

fn timeouts(events: &[AgentEvent]) -> Vec<CommandTimeout> {
    events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::CommandTimeout(timeout) => Some(timeout.clone()),
            _ => None,
        })
        .collect()
}

fn updates(events: &[AgentEvent]) -> Vec<(UpdateStatus, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::AgentUpdated {
                status, details, ..
            } => Some((*status, details.clone())),
            _ => None,
        })
        .collect()
}

fn has_command_error(events: &[AgentEvent]) -> bool {
    events
        .iter()
        .any(|event| matches!(event, AgentEvent::CommandError { .. }))
}

#[tokio::test(start_paused = true)]
async fn test_silent_agent_is_freed_after_timeout() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::other("provision_site", json!({})), 0)
        .await;
    hub.enqueue_command(agent.id.clone(), CommandPayload::other("next", json!({})), 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    agent.disconnect(&hub).await;

    tokio::time::advance(TIMEOUT - Duration::from_secs(1)).await;
    assert_eq!(hub.queue().timeout_sweep().await.unwrap(), 0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(hub.queue().timeout_sweep().await.unwrap(), 1);

    let fired = timeouts(&drain_events(&mut events));
    assert_eq!(fired.len(), 1);
    let timeout = &fired[0];
    assert_eq!(timeout.agent_id, agent.id);
    assert_eq!(timeout.original_type, "provision_site");
    assert!(timeout.elapsed_time_ms >= 300_000);
    assert!(!timeout.likely_succeeded);
    assert!(timeout.message.contains("timed out"));

    let session = hub.session(&agent.id).unwrap();
    assert_eq!(session.state, SessionState::Disconnected);
    assert!(session.current_command_type.is_none());
    assert_eq!(session.queue_length, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_most_once() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::other("backup", json!({})), 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();

    tokio::time::advance(TIMEOUT).await;
    assert_eq!(hub.queue().timeout_sweep().await.unwrap(), 1);
    assert_eq!(hub.queue().timeout_sweep().await.unwrap(), 0);
    tokio::time::advance(TIMEOUT).await;
    assert_eq!(hub.queue().timeout_sweep().await.unwrap(), 0);

    assert_eq!(timeouts(&drain_events(&mut events)).len(), 1);
    assert!(!hub.mark_agent_available(&agent.id).await);
    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Online);
}

#[tokio::test(start_paused = true)]
async fn test_late_completion_after_timeout_is_ignored() {
    init_logging();
    let hub = hub().await;
    let mut agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::other("slow", json!({})), 0)
        .await;
    hub.enqueue_command(agent.id.clone(), CommandPayload::other("fast", json!({})), 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    let slow_id = agent.sent()[0]["commandId"].as_str().unwrap().to_string();

    tokio::time::advance(TIMEOUT).await;
    hub.queue().timeout_sweep().await.unwrap();
    hub.queue().dispatch_tick().await.unwrap();
    assert_eq!(agent.sent()[0]["type"], "fast");

    agent.report(
        &hub,
        json!({"type": "command_result", "agentId": "agent-1", "status": "completed", "commandId": slow_id}),
    );
    hub.telemeter().tick().await.unwrap();

    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Busy);
}

#[tokio::test(start_paused = true)]
async fn test_self_update_timeout_then_reconnect_reports_success() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 5)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    agent.disconnect(&hub).await;

    tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
    hub.queue().timeout_sweep().await.unwrap();

    let fired = timeouts(&drain_events(&mut events));
    assert_eq!(fired.len(), 1);
    assert!(fired[0].likely_succeeded);
    assert_eq!(fired[0].original_type, "update_agent");

    let _agent = TestAgent::connect(&hub, "agent-1").await;
    let after = drain_events(&mut events);
    let reported = updates(&after);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, UpdateStatus::Success);
    assert!(reported[0].1.contains("update_agent"));
    assert!(!has_command_error(&after));

    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Online);
}

#[tokio::test]
async fn test_reconnect_during_self_update_frees_agent_and_reports_success() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(
        agent.id.clone(),
        CommandPayload::RollbackAgent {
            commit_id: "abc".into(),
        },
        0,
    )
    .await;
    hub.queue().dispatch_tick().await.unwrap();
    agent.disconnect(&hub).await;
    assert_eq!(
        hub.session(&agent.id).unwrap().state,
        SessionState::Disconnected
    );

    let _agent = TestAgent::connect(&hub, "agent-1").await;

    let after = drain_events(&mut events);
    let reported = updates(&after);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, UpdateStatus::Success);
    assert!(timeouts(&after).is_empty());
    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Online);
}

#[tokio::test]
async fn test_reconnect_during_ordinary_command_frees_agent_without_update_event() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::SystemUpdate { priority: None }, 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    agent.disconnect(&hub).await;
    let _agent = TestAgent::connect(&hub, "agent-1").await;

    assert!(updates(&drain_events(&mut events)).is_empty());
    assert_eq!(hub.session(&agent.id).unwrap().state, SessionState::Online);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_heuristic_can_be_disabled() {
    init_logging();
    let options = GatewayOptions::builder()
        .reconnect_implies_update_success(false)
        .build();
    let hub = hub_with(options, Arc::new(MemoryStore::new())).await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    agent.disconnect(&hub).await;
    tokio::time::advance(TIMEOUT).await;
    hub.queue().timeout_sweep().await.unwrap();

    let _agent = TestAgent::connect(&hub, "agent-1").await;
    let all = drain_events(&mut events);
    assert_eq!(timeouts(&all).len(), 1);
    assert!(updates(&all).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_running_time_is_reported_for_busy_agent() {
    init_logging();
    let hub = hub().await;
    let agent = TestAgent::connect(&hub, "agent-1").await;
    hub.enqueue_command(agent.id.clone(), CommandPayload::other("deploy", json!({})), 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();

    tokio::time::advance(Duration::from_secs(42)).await;

    let session = hub.session(&agent.id).unwrap();
    assert_eq!(session.current_command_type.as_deref(), Some("deploy"));
    assert_eq!(session.running_time_ms, Some(42_000));
}

#[tokio::test]
async fn test_explicit_update_report_after_reconnect_is_not_announced_twice() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let mut agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    let command_id = agent.sent()[0]["commandId"].as_str().unwrap().to_string();
    agent.disconnect(&hub).await;

    let restarted = TestAgent::connect(&hub, "agent-1").await;
    restarted.report(
        &hub,
        json!({"type": "update_success", "agentId": "agent-1", "commandId": command_id}),
    );
    hub.telemeter().tick().await.unwrap();

    let reported = updates(&drain_events(&mut events));
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, UpdateStatus::Success);
}

#[tokio::test]
async fn test_uncorrelated_update_report_after_reconnect_is_not_announced_twice() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    agent.disconnect(&hub).await;

    let restarted = TestAgent::connect(&hub, "agent-1").await;
    restarted.report(&hub, json!({"type": "update_success", "agentId": "agent-1"}));
    hub.telemeter().tick().await.unwrap();

    assert_eq!(updates(&drain_events(&mut events)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_update_is_not_confirmed_after_window() {
    init_logging();
    let options = GatewayOptions::builder()
        .update_confirm_window(Duration::from_secs(600))
        .build();
    let hub = hub_with(options, Arc::new(MemoryStore::new())).await;
    let mut events = hub.subscribe();
    let agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    agent.disconnect(&hub).await;
    tokio::time::advance(TIMEOUT).await;
    hub.queue().timeout_sweep().await.unwrap();

    tokio::time::advance(Duration::from_secs(601)).await;
    let _agent = TestAgent::connect(&hub, "agent-1").await;

    assert!(updates(&drain_events(&mut events)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_later_dispatch_clears_timed_out_update() {
    init_logging();
    let hub = hub().await;
    let mut events = hub.subscribe();
    let mut agent = TestAgent::connect(&hub, "agent-1").await;

    hub.enqueue_command(agent.id.clone(), CommandPayload::UpdateAgent, 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    tokio::time::advance(TIMEOUT).await;
    hub.queue().timeout_sweep().await.unwrap();

    hub.enqueue_command(agent.id.clone(), CommandPayload::other("deploy", json!({})), 0)
        .await;
    hub.queue().dispatch_tick().await.unwrap();
    let frames = agent.sent();
    assert_eq!(frames.len(), 2);
    agent.report(
        &hub,
        json!({"type": "command_result", "agentId": "agent-1", "status": "completed", "commandId": frames[1]["commandId"]}),
    );
    hub.telemeter().tick().await.unwrap();

    agent.disconnect(&hub).await;
    let _agent = TestAgent::connect(&hub, "agent-1").await;

    assert!(updates(&drain_events(&mut events)).is_empty());
}
