use std::sync::Arc;
use std::time::Duration;

use questloom::command::{CommandEnvelope, DeletionCommand};
use questloom::state::{DeletionState, ProgressProjection, WorkflowState};
use questloom::store::{InMemoryStateStore, WorkflowStore};
use questloom::types::EntityCategory;
use serde_json::json;

fn generation_state(request_id: &str) -> WorkflowState {
    let body = serde_json::to_vec(&json!({
        "request_id": request_id,
        "user_id": "u1",
        "workflow_action": "start",
        "genre": "mystery",
        "world_name": "Veldra",
        "num_quests": 2,
    }))
    .unwrap();
    match CommandEnvelope::decode(&body).unwrap() {
        CommandEnvelope::Generate(cmd) => WorkflowState::from_command(&cmd),
        CommandEnvelope::Delete(_) => unreachable!("start command routes to generation"),
    }
}

fn deletion_state(request_id: &str) -> DeletionState {
    DeletionState::from_command(&DeletionCommand {
        request_id: request_id.to_string(),
        campaign_id: "camp-1".to_string(),
        user_id: "u1".to_string(),
        sequence: 0,
    })
}

fn store() -> WorkflowStore {
    WorkflowStore::new(Arc::new(InMemoryStateStore::new()))
}

#[tokio::test]
async fn generation_state_survives_a_reload() {
    let store = store();
    let mut state = generation_state("r1");
    state.record_warning("slow provider");
    state.record_audit("phase_completed", "story candidates ready");

    store.save_generation(&state).await.unwrap();
    let loaded = store.load_generation("r1").await.unwrap().unwrap();
    assert_eq!(loaded, state);

    assert!(store.load_generation("r-absent").await.unwrap().is_none());
}

#[tokio::test]
async fn generation_and_deletion_keyspaces_are_disjoint() {
    let store = store();
    // Same request id on purpose; the records must not clobber each other.
    store.save_generation(&generation_state("r1")).await.unwrap();
    let mut deletion = deletion_state("r1");
    deletion.record_deleted(EntityCategory::Npc, vec!["npc-1".to_string()]);
    store.save_deletion(&deletion).await.unwrap();

    let generation = store.load_generation("r1").await.unwrap().unwrap();
    assert_eq!(generation.user_id, "u1");
    assert!(generation.final_campaign_id.is_none());
    let del = store.load_deletion("r1").await.unwrap().unwrap();
    assert_eq!(del.deleted_count(), 1);
}

#[tokio::test]
async fn checkpoint_writes_state_and_projection_together() {
    let store = store();
    let mut state = generation_state("r2");
    state.record_warning("retrying story generation");

    let projection = store.checkpoint_generation(&state).await.unwrap();
    assert_eq!(projection.request_id, "r2");
    assert_eq!(projection.warnings, vec!["retrying story generation"]);
    assert!(!projection.blocks_dispatch());

    let stored = store
        .load_generation_progress("r2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.current_phase, projection.current_phase);
    assert_eq!(stored.progress_percentage, projection.progress_percentage);
    assert!(store.load_generation("r2").await.unwrap().is_some());
}

#[tokio::test]
async fn completed_state_projects_as_blocking() {
    let mut state = generation_state("r3");
    state.final_campaign_id = Some("campaign-r3".to_string());

    let projection = ProgressProjection::from_generation(&state);
    assert!(projection.terminal);
    assert!(projection.blocks_dispatch());
    assert_eq!(projection.final_campaign_id.as_deref(), Some("campaign-r3"));
}

#[tokio::test]
async fn expired_records_read_as_absent() {
    let store = WorkflowStore::with_ttl(Arc::new(InMemoryStateStore::new()), Duration::ZERO);
    store.save_generation(&generation_state("r4")).await.unwrap();
    assert!(store.load_generation("r4").await.unwrap().is_none());
}

#[tokio::test]
async fn guard_reads_generation_progress_first() {
    let store = store();
    let deletion = deletion_state("r5");
    store
        .save_deletion_progress(&ProgressProjection::from_deletion(&deletion))
        .await
        .unwrap();

    // Only the deletion projection exists so far.
    let p = store.load_any_progress("r5").await.unwrap().unwrap();
    assert!(p.status_message.contains("camp-1"));

    // Once a generation projection appears it wins.
    store
        .save_generation_progress(&ProgressProjection::from_generation(&generation_state(
            "r5",
        )))
        .await
        .unwrap();
    let p = store.load_any_progress("r5").await.unwrap().unwrap();
    assert!(!p.status_message.contains("camp-1"));
}

#[tokio::test]
async fn cancellation_marker_roundtrips() {
    let store = store();
    let marker = ProgressProjection::cancelled("r6", "u1");
    store.save_generation_progress(&marker).await.unwrap();

    let loaded = store.load_any_progress("r6").await.unwrap().unwrap();
    assert!(loaded.terminal);
    assert!(loaded.blocks_dispatch());
    assert_eq!(loaded.status_message, "cancelled by user");
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use questloom::store::{RecordKind, SqliteStateStore, StateStore, StoreKey};

    async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteStateStore {
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("state.db").display()
        );
        SqliteStateStore::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sqlite_store(&dir).await;
        let key = StoreKey::new(RecordKind::GenerationState, "r1");

        backend
            .put(&key, "{\"a\":1}".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            backend.get(&key).await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        backend.delete(&key).await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_rows_are_invisible_and_purgeable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sqlite_store(&dir).await;
        let key = StoreKey::new(RecordKind::GenerationProgress, "r2");

        backend
            .put(&key, "x".to_string(), Duration::ZERO)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(backend.get(&key).await.unwrap(), None);
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert_eq!(backend.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn typed_records_roundtrip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(sqlite_store(&dir).await);
        let store = WorkflowStore::new(backend);

        let state = generation_state("r3");
        store.save_generation(&state).await.unwrap();
        assert_eq!(store.load_generation("r3").await.unwrap().unwrap(), state);
    }
}
