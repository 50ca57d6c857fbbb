//! Shared harness and command-body builders.

use std::sync::Arc;

use serde_json::{Value, json};

use questloom::deletion::DeletionEngine;
use questloom::generation::GenerationEngine;
use questloom::publisher::ProgressPublisher;
use questloom::router::MessageRouter;
use questloom::store::{InMemoryStateStore, WorkflowStore};

use super::fakes::{CollectingEmitter, FakeDocumentStore, FakeGraphStore, ScriptedGenerator};

/// Fully wired orchestrator over fakes and an in-memory store.
pub struct Harness {
    pub store: WorkflowStore,
    pub emitter: CollectingEmitter,
    pub generator: Arc<ScriptedGenerator>,
    pub documents: Arc<FakeDocumentStore>,
    pub graph: Arc<FakeGraphStore>,
    pub generation: Arc<GenerationEngine>,
    pub deletion: Arc<DeletionEngine>,
    pub router: Arc<MessageRouter>,
}

pub fn harness() -> Harness {
    let store = WorkflowStore::new(Arc::new(InMemoryStateStore::new()));
    let emitter = CollectingEmitter::new();
    let publisher = ProgressPublisher::new(Arc::new(emitter.clone()));
    let generator = Arc::new(ScriptedGenerator::new());
    let documents = Arc::new(FakeDocumentStore::seeded());
    let graph = Arc::new(FakeGraphStore::new());

    let generation = Arc::new(
        GenerationEngine::new(store.clone(), generator.clone(), publisher.clone())
            .with_retry_base_delay(std::time::Duration::from_millis(1)),
    );
    let deletion = Arc::new(DeletionEngine::new(
        store.clone(),
        documents.clone(),
        graph.clone(),
        None,
        publisher.clone(),
    ));
    let router = Arc::new(MessageRouter::new(
        store.clone(),
        generation.clone(),
        deletion.clone(),
        publisher,
    ));

    Harness {
        store,
        emitter,
        generator,
        documents,
        graph,
        generation,
        deletion,
        router,
    }
}

pub fn start_body(request_id: &str, user_id: &str) -> Vec<u8> {
    body(json!({
        "request_id": request_id,
        "user_id": user_id,
        "workflow_action": "start",
        "genre": "mystery",
        "world_name": "Veldra",
        "num_quests": 2,
    }))
}

pub fn action_body(request_id: &str, user_id: &str, action: &str) -> Vec<u8> {
    body(json!({
        "request_id": request_id,
        "user_id": user_id,
        "workflow_action": action,
    }))
}

pub fn select_story_body(request_id: &str, user_id: &str, story_id: &str) -> Vec<u8> {
    body(json!({
        "request_id": request_id,
        "user_id": user_id,
        "workflow_action": "select_story",
        "selected_story_id": story_id,
    }))
}

pub fn delete_body(request_id: &str, user_id: &str, campaign_id: &str) -> Vec<u8> {
    body(json!({
        "request_id": request_id,
        "user_id": user_id,
        "campaign_id": campaign_id,
    }))
}

pub fn body(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).expect("fixture body serializes")
}
