//! Tests for the operation store implementations

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::init_logging;
use kodegen_agent_gateway::{
    AgentConnectivity, AgentId, CommandPayload, GatewayError, JsonFileStore, MemoryStore,
    OperationId, OperationStatus, OperationStore, OutboundCommand, PendingOperation,
};
use serde_json::json;

fn operation(agent: &str, kind: &str, age_secs: i64) -> PendingOperation {
    let mut operation = PendingOperation::new(AgentId::new(agent), kind, None, json!({}));
    operation.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
    operation
}

async fn exercise_operations(store: &dyn OperationStore) {
    let newest = operation("agent-1", "update_agent", 10);
    let oldest = operation("agent-1", "system_update", 30);
    let elsewhere = operation("agent-2", "update_agent", 20);
    for row in [&newest, &oldest, &elsewhere] {
        store.create_operation(row.clone()).await.unwrap();
    }

    let duplicate = store.create_operation(newest.clone()).await;
    assert!(matches!(duplicate, Err(GatewayError::Store(_))));

    let all: Vec<OperationId> = store
        .list_pending(None)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(all, [oldest.id.clone(), elsewhere.id.clone(), newest.id.clone()]);

    let agent_1 = AgentId::new("agent-1");
    let scoped = store.list_pending(Some(&agent_1)).await.unwrap();
    assert_eq!(scoped.len(), 2);

    let at = Utc::now();
    let retried = store.record_retry(&newest.id, at).await.unwrap();
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.last_retry_at, Some(at));
    let retried = store.record_retry(&newest.id, Utc::now()).await.unwrap();
    assert_eq!(retried.retry_count, 2);

    store
        .set_status(&oldest.id, OperationStatus::Completed)
        .await
        .unwrap();
    assert_eq!(store.list_pending(Some(&agent_1)).await.unwrap().len(), 1);
    assert_eq!(
        store.get_operation(&oldest.id).await.unwrap().unwrap().status,
        OperationStatus::Completed
    );

    let missing = OperationId::new("missing");
    assert!(store.get_operation(&missing).await.unwrap().is_none());
    assert!(store.record_retry(&missing, Utc::now()).await.is_err());
    assert!(
        store
            .set_status(&missing, OperationStatus::Failed)
            .await
            .is_err()
    );
}

async fn exercise_journal(store: &dyn OperationStore) {
    let agent = AgentId::new("agent-1");
    let mut first = OutboundCommand::new(agent.clone(), CommandPayload::UpdateAgent, 1);
    first.enqueued_at = Utc::now() - ChronoDuration::seconds(5);
    let second = OutboundCommand::new(
        agent.clone(),
        CommandPayload::RollbackAgent {
            commit_id: "abc".into(),
        },
        2,
    );

    store.save_command(&second).await.unwrap();
    store.save_command(&first).await.unwrap();
    store.save_command(&first).await.unwrap();

    let loaded = store.load_commands().await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id, first.id);
    assert_eq!(loaded[1].payload, second.payload);

    store.remove_command(&first.id).await.unwrap();
    store.remove_command(&first.id).await.unwrap();
    assert_eq!(store.load_commands().await.unwrap().len(), 1);

    assert!(store.connectivity(&agent).await.unwrap().is_none());
    let connectivity = AgentConnectivity {
        online: true,
        last_change: Utc::now(),
    };
    store
        .set_connectivity(&agent, connectivity.clone())
        .await
        .unwrap();
    assert_eq!(store.connectivity(&agent).await.unwrap(), Some(connectivity));
}

#[tokio::test]
async fn test_memory_store_operations() {
    init_logging();
    exercise_operations(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_memory_store_journal_and_connectivity() {
    init_logging();
    exercise_journal(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_file_store_operations() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("state.json")).await.unwrap();
    exercise_operations(&store).await;
}

#[tokio::test]
async fn test_file_store_journal_and_connectivity() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("state.json")).await.unwrap();
    exercise_journal(&store).await;
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");

    let row = operation("agent-1", "rollback_agent", 0);
    let command = OutboundCommand::new(AgentId::new("agent-1"), CommandPayload::UpdateAgent, 3)
        .for_operation(row.id.clone());
    {
        let store = JsonFileStore::open(&path).await.unwrap();
        store.create_operation(row.clone()).await.unwrap();
        store.record_retry(&row.id, Utc::now()).await.unwrap();
        store.save_command(&command).await.unwrap();
    }
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());

    let reopened = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(reopened.path(), path.as_path());

    let loaded = reopened.get_operation(&row.id).await.unwrap().unwrap();
    assert_eq!(loaded.retry_count, 1);
    assert_eq!(loaded.operation_type, "rollback_agent");

    let journal = reopened.load_commands().await.unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].operation_id.as_ref(), Some(&row.id));
    assert_eq!(journal[0].priority, 3);
}

#[tokio::test]
async fn test_file_store_treats_empty_file_as_fresh() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"").unwrap();

    let store = JsonFileStore::open(&path).await.unwrap();
    assert!(store.list_pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_store_rejects_corrupt_snapshot() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let result = JsonFileStore::open(&path).await;
    assert!(matches!(result, Err(GatewayError::Store(_))));
}
