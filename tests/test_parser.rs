//! Tests for agent frame parsing and message classification

use chrono::Utc;
use kodegen_agent_gateway::message::MAX_FRAME_BYTES;
use kodegen_agent_gateway::{
    AgentId, CommandPayload, Completion, GatewayError, MessagePriority, parse_frame, parse_message,
};
use serde_json::json;

#[test]
fn test_parse_operation_status() {
    let result = parse_message(json!({
        "type": "operation_status",
        "agentId": "web-01",
        "status": "completed",
        "operation": "provision_site",
        "domain": "example.com",
        "commandId": "c-1",
        "operationId": "op-1"
    }));

    assert!(result.is_ok());
    let message = result.unwrap();
    assert_eq!(message.kind, "operation_status");
    assert_eq!(message.agent_id, AgentId::new("web-01"));
    assert_eq!(message.domain.as_deref(), Some("example.com"));
    assert_eq!(message.command_id.as_ref().map(|id| id.as_str()), Some("c-1"));
    assert_eq!(message.derive_priority(), MessagePriority::Medium);
}

#[test]
fn test_parse_keeps_unknown_fields() {
    let message = parse_message(json!({
        "type": "metrics",
        "agentId": "web-01",
        "cpu": 0.25,
        "disks": {"/": 0.7}
    }))
    .unwrap();

    assert_eq!(message.extra["cpu"], 0.25);
    assert_eq!(message.extra["disks"]["/"], 0.7);
    assert_eq!(message.derive_priority(), MessagePriority::Low);
}

#[test]
fn test_parse_missing_agent_id() {
    let result = parse_message(json!({"type": "heartbeat"}));
    assert!(matches!(result, Err(GatewayError::MessageParse { .. })));
}

#[test]
fn test_parse_missing_type() {
    let result = parse_message(json!({"agentId": "web-01"}));
    assert!(result.is_err());
}

#[test]
fn test_parse_frame_rejects_non_json() {
    let result = parse_frame("hello");
    assert!(matches!(result, Err(GatewayError::MessageParse { .. })));
}

#[test]
fn test_parse_frame_rejects_oversized_frame() {
    let padding = "x".repeat(MAX_FRAME_BYTES);
    let frame = json!({"type": "log", "agentId": "web-01", "line": padding}).to_string();

    let error = parse_frame(&frame).unwrap_err();
    assert!(error.to_string().contains("exceeds maximum"));
}

#[test]
fn test_error_messages_are_high_priority() {
    let typed = parse_message(json!({"type": "error", "agentId": "web-01"})).unwrap();
    let embedded = parse_message(json!({
        "type": "operation_status",
        "agentId": "web-01",
        "error": {"code": 5}
    }))
    .unwrap();

    assert_eq!(typed.derive_priority(), MessagePriority::High);
    assert_eq!(embedded.derive_priority(), MessagePriority::High);
}

#[test]
fn test_dedup_key_preference() {
    let agent = AgentId::new("web-01");
    let by_id = parse_message(json!({
        "type": "heartbeat", "agentId": "web-01", "messageId": "m-1", "sequence": 4
    }))
    .unwrap();
    let by_sequence =
        parse_message(json!({"type": "heartbeat", "agentId": "web-01", "sequence": 4})).unwrap();
    let by_time = parse_message(json!({
        "type": "heartbeat", "agentId": "web-01", "sentAt": "2026-01-01T00:00:00Z"
    }))
    .unwrap();
    let keyless = parse_message(json!({"type": "heartbeat", "agentId": "web-01"})).unwrap();

    assert_eq!(by_id.dedup_key(&agent).as_deref(), Some("web-01:id:m-1"));
    assert_eq!(by_sequence.dedup_key(&agent).as_deref(), Some("web-01:seq:4"));
    assert!(by_time.dedup_key(&agent).unwrap().contains("2026-01-01T00:00:00Z"));
    assert!(keyless.dedup_key(&agent).is_none());
}

#[test]
fn test_completion_classification() {
    let classify = |value: serde_json::Value| {
        parse_message(value)
            .unwrap()
            .normalize(AgentId::new("web-01"), Utc::now())
            .completion()
    };

    assert_eq!(
        classify(json!({"type": "operation_status", "agentId": "a", "status": "Completed"})),
        Some(Completion::Completed)
    );
    assert_eq!(
        classify(json!({"type": "command_result", "agentId": "a", "status": "failed"})),
        Some(Completion::Failed)
    );
    assert_eq!(
        classify(json!({"type": "operation_status", "agentId": "a", "status": "running"})),
        None
    );
    assert_eq!(
        classify(json!({"type": "error", "agentId": "a", "error": "boom"})),
        Some(Completion::Error)
    );
    assert_eq!(
        classify(json!({"type": "update_success", "agentId": "a"})),
        Some(Completion::UpdateSucceeded)
    );
    assert_eq!(
        classify(json!({"type": "update_failed", "agentId": "a", "error": "checksum"})),
        Some(Completion::UpdateFailed)
    );
    assert_eq!(classify(json!({"type": "heartbeat", "agentId": "a"})), None);
}

#[test]
fn test_command_wire_format() {
    let rollback = CommandPayload::from_value(json!({"type": "rollback_agent", "commitId": "abc"}))
        .unwrap();
    assert_eq!(
        rollback,
        CommandPayload::RollbackAgent {
            commit_id: "abc".into()
        }
    );
    assert!(rollback.is_self_update());

    let missing_commit = CommandPayload::from_value(json!({"type": "rollback_agent"}));
    assert!(missing_commit.is_err());

    let custom = CommandPayload::other("restart_php", json!({"version": "8.3", "type": "ignored"}));
    let wire = custom.to_value();
    assert_eq!(wire["type"], "restart_php");
    assert_eq!(wire["version"], "8.3");
    assert!(custom.is_self_update());

    assert!(!CommandPayload::SystemUpdate { priority: Some(1) }.is_self_update());
}

#[test]
fn test_non_numeric_sequence_still_parses() {
    let agent = AgentId::new("web-01");
    let textual = parse_message(json!({
        "type": "operation_status",
        "agentId": "web-01",
        "status": "completed",
        "operation": "provision_site",
        "sequence": "17"
    }))
    .unwrap();
    let negative =
        parse_message(json!({"type": "heartbeat", "agentId": "web-01", "sequence": -3})).unwrap();

    assert_eq!(textual.dedup_key(&agent).as_deref(), Some("web-01:seq:17"));
    assert_eq!(negative.dedup_key(&agent).as_deref(), Some("web-01:seq:-3"));
    assert_eq!(
        textual.normalize(agent, Utc::now()).completion(),
        Some(Completion::Completed)
    );
}
