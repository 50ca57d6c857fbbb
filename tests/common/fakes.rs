//! Fake collaborators for integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;

use questloom::deletion::{ContentStoreError, DocumentStore, GraphStore, RelationalStore};
use questloom::event_bus::{EmitterError, EventEmitter, OutboundEvent};
use questloom::generator::{ContentGenerator, GeneratorError, PhaseOutput};
use questloom::state::{StoryIdea, WorkflowState};
use questloom::types::{EntityCategory, GenerationPhase};

/// Synchronous emitter capturing events in memory, so assertions never race a
/// background listener.
#[derive(Clone, Default)]
pub struct CollectingEmitter {
    events: Arc<Mutex<Vec<OutboundEvent>>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.label.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl std::fmt::Debug for CollectingEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectingEmitter")
            .field("events", &self.events.lock().len())
            .finish()
    }
}

impl EventEmitter for CollectingEmitter {
    fn emit(&self, event: OutboundEvent) -> Result<(), EmitterError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Deterministic generator producing canned artifacts, with per-phase
/// failure injection for retry tests.
#[derive(Default)]
pub struct ScriptedGenerator {
    /// Remaining failures to inject, per phase.
    failures: Mutex<FxHashMap<GenerationPhase, (u32, bool)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `times` invocations of `phase` before succeeding.
    pub fn fail_phase(&self, phase: GenerationPhase, times: u32, retryable: bool) {
        self.failures.lock().insert(phase, (times, retryable));
    }

    fn take_failure(&self, phase: GenerationPhase) -> Option<bool> {
        let mut failures = self.failures.lock();
        match failures.get_mut(&phase) {
            Some((remaining, retryable)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*retryable)
            }
            _ => None,
        }
    }
}

pub fn canned_story_ideas() -> Vec<StoryIdea> {
    vec![
        StoryIdea {
            id: "story-1".to_string(),
            title: "The Sunken Archive".to_string(),
            summary: "A drowned library holds the region's lost history.".to_string(),
            hooks: vec!["recover the index".to_string()],
        },
        StoryIdea {
            id: "story-2".to_string(),
            title: "Ashes of the Concord".to_string(),
            summary: "A broken truce between rival holds reignites.".to_string(),
            hooks: vec![],
        },
        StoryIdea {
            id: "story-3".to_string(),
            title: "The Long Thaw".to_string(),
            summary: "Something old wakes beneath the melting glacier.".to_string(),
            hooks: vec!["find the first melt survivor".to_string()],
        },
    ]
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn run_phase(
        &self,
        phase: GenerationPhase,
        state: &WorkflowState,
    ) -> Result<PhaseOutput, GeneratorError> {
        if let Some(retryable) = self.take_failure(phase) {
            return Err(GeneratorError::Provider {
                phase,
                message: "injected failure".to_string(),
                retryable,
            });
        }
        let output = match phase {
            GenerationPhase::StoryGeneration => PhaseOutput::StoryIdeas(canned_story_ideas()),
            GenerationPhase::CoreGeneration => PhaseOutput::CampaignCore(json!({
                "title": "Test Campaign",
                "story_id": state.selected_story_id,
                "genre": state.genre,
            })),
            GenerationPhase::QuestGeneration => PhaseOutput::Quests {
                quests: (0..state.num_quests)
                    .map(|i| json!({ "id": format!("quest-{i}"), "index": i }))
                    .collect(),
                new_species_ids: vec!["species-new-1".to_string()],
            },
            GenerationPhase::PlaceGeneration => PhaseOutput::Places {
                places: vec![json!({ "id": "place-1" }), json!({ "id": "place-2" })],
                new_locations: vec![json!({ "id": "loc-new-1" })],
            },
            GenerationPhase::SceneGeneration => PhaseOutput::Scenes {
                scenes: vec![json!({ "id": "scene-1" })],
                npcs: vec![json!({ "id": "npc-1" })],
                discoveries: vec![json!({ "id": "disc-1" })],
                events: vec![json!({ "id": "event-1" })],
                challenges: vec![json!({ "id": "chal-1" })],
                new_npc_ids: vec!["npc-1".to_string()],
            },
            GenerationPhase::Finalize => PhaseOutput::Finalized {
                campaign_id: format!("campaign-{}", state.request_id),
            },
            other => return Err(GeneratorError::UnsupportedPhase { phase: other }),
        };
        Ok(output)
    }
}

/// In-memory document store seeded with entities for one campaign.
#[derive(Default)]
pub struct FakeDocumentStore {
    /// category string -> entity ids still present.
    entities: Mutex<FxHashMap<String, Vec<String>>>,
    failing_categories: Mutex<Vec<EntityCategory>>,
    /// species id -> number of OTHER campaigns referencing it.
    species_refs: Mutex<FxHashMap<String, u64>>,
    location_refs: Mutex<FxHashMap<String, u64>>,
    removed_species: Mutex<Vec<String>>,
    removed_locations: Mutex<Vec<String>>,
    root_present: Mutex<bool>,
    fail_root: Mutex<bool>,
}

impl FakeDocumentStore {
    /// A campaign with two entities in every category, one introduced species
    /// (unreferenced elsewhere) and one introduced location (still shared).
    pub fn seeded() -> Self {
        let store = Self {
            root_present: Mutex::new(true),
            ..Self::default()
        };
        {
            let mut entities = store.entities.lock();
            for category in EntityCategory::DELETION_ORDER {
                entities.insert(
                    category.as_str().to_string(),
                    vec![
                        format!("{category}-1"),
                        format!("{category}-2"),
                    ],
                );
            }
        }
        store.species_refs.lock().insert("species-new-1".to_string(), 0);
        store.location_refs.lock().insert("loc-new-1".to_string(), 2);
        store
    }

    pub fn fail_category(&self, category: EntityCategory) {
        self.failing_categories.lock().push(category);
    }

    pub fn set_fail_root(&self, fail: bool) {
        *self.fail_root.lock() = fail;
    }

    pub fn removed_species(&self) -> Vec<String> {
        self.removed_species.lock().clone()
    }

    pub fn removed_locations(&self) -> Vec<String> {
        self.removed_locations.lock().clone()
    }

    pub fn remaining(&self, category: EntityCategory) -> usize {
        self.entities
            .lock()
            .get(category.as_str())
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn delete_category(
        &self,
        _campaign_id: &str,
        category: EntityCategory,
    ) -> Result<Vec<String>, ContentStoreError> {
        if self.failing_categories.lock().contains(&category) {
            return Err(ContentStoreError::backend(format!(
                "simulated {category} outage"
            )));
        }
        Ok(self
            .entities
            .lock()
            .remove(category.as_str())
            .unwrap_or_default())
    }

    async fn delete_campaign_root(&self, _campaign_id: &str) -> Result<bool, ContentStoreError> {
        if *self.fail_root.lock() {
            return Err(ContentStoreError::backend("simulated root outage"));
        }
        let mut present = self.root_present.lock();
        let existed = *present;
        *present = false;
        Ok(existed)
    }

    async fn campaign_species(
        &self,
        _campaign_id: &str,
    ) -> Result<Vec<String>, ContentStoreError> {
        Ok(self.species_refs.lock().keys().cloned().collect())
    }

    async fn campaign_locations(
        &self,
        _campaign_id: &str,
    ) -> Result<Vec<String>, ContentStoreError> {
        Ok(self.location_refs.lock().keys().cloned().collect())
    }

    async fn species_reference_count(
        &self,
        species_id: &str,
        _excluding_campaign: &str,
    ) -> Result<u64, ContentStoreError> {
        Ok(*self.species_refs.lock().get(species_id).unwrap_or(&0))
    }

    async fn location_reference_count(
        &self,
        location_id: &str,
        _excluding_campaign: &str,
    ) -> Result<u64, ContentStoreError> {
        Ok(*self.location_refs.lock().get(location_id).unwrap_or(&0))
    }

    async fn remove_species(&self, species_id: &str) -> Result<(), ContentStoreError> {
        self.species_refs.lock().remove(species_id);
        self.removed_species.lock().push(species_id.to_string());
        Ok(())
    }

    async fn remove_location(&self, location_id: &str) -> Result<(), ContentStoreError> {
        self.location_refs.lock().remove(location_id);
        self.removed_locations.lock().push(location_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGraphStore {
    fail: Mutex<bool>,
    deleted: Mutex<Vec<String>>,
}

impl FakeGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        *self.fail.lock() = true;
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl GraphStore for FakeGraphStore {
    async fn delete_campaign_graph(&self, campaign_id: &str) -> Result<u64, ContentStoreError> {
        if *self.fail.lock() {
            return Err(ContentStoreError::backend("simulated graph outage"));
        }
        self.deleted.lock().push(campaign_id.to_string());
        Ok(17)
    }
}

#[derive(Default)]
pub struct FakeRelationalStore {
    deleted: Mutex<Vec<String>>,
}

impl FakeRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl RelationalStore for FakeRelationalStore {
    async fn delete_campaign_rows(&self, campaign_id: &str) -> Result<u64, ContentStoreError> {
        self.deleted.lock().push(campaign_id.to_string());
        Ok(4)
    }
}
