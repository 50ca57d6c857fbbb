//! Durable workflow state for campaign generation and deletion.
//!
//! The records here are the single source of truth for an in-flight request.
//! Engines never trust in-memory state across commands: every phase handler
//! reloads the record for its `request_id` from the store, mutates it, and
//! persists it again before publishing progress.
//!
//! All shapes are explicit serde structs with a `schema_version` tag and
//! `#[serde(default)]` on fields that may be absent in older payloads, so a
//! restarted worker can always decode what an earlier version wrote.
//!
//! # Core Types
//!
//! - [`WorkflowState`]: full generation state, terminal once
//!   `final_campaign_id` is set
//! - [`DeletionState`]: mirror-image teardown state with per-category deleted
//!   ids and dependency counts for shared world content
//! - [`ProgressProjection`]: the compact, read-optimized view written on every
//!   transition so status can be polled without replaying full state

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{DeletionCommand, GenerationCommand};
use crate::generator::PhaseOutput;
use crate::types::{DeletionPhase, EntityCategory, GenerationPhase};

/// Current persisted schema version for all three record kinds.
pub const SCHEMA_VERSION: u32 = 1;

fn schema_version_default() -> u32 {
    SCHEMA_VERSION
}

/// One candidate story pitch produced by the story generation phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryIdea {
    pub id: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub hooks: Vec<String>,
}

/// Timestamped entry in the append-only `errors` array.
///
/// Errors accumulate; they are never replaced, so a caller polling progress
/// sees the full history of a workflow's problems rather than the latest one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
    pub phase: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ErrorEntry {
    pub fn new(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            phase: phase.into(),
            message: message.into(),
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Timestamped entry in the append-only audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
    pub phase: String,
    pub action: String,
    #[serde(default)]
    pub note: String,
}

impl AuditEntry {
    pub fn new(
        phase: impl Into<String>,
        action: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            when: Utc::now(),
            phase: phase.into(),
            action: action.into(),
            note: note.into(),
        }
    }
}

/// Full state of one campaign generation workflow, keyed by `request_id`.
///
/// Invariant: once `final_campaign_id` is non-null the workflow is terminal —
/// no further phase execution is permitted for that `request_id`. The router's
/// idempotency guard enforces this against the stored projection before any
/// dispatch happens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
    pub request_id: String,
    pub user_id: String,
    #[serde(default)]
    pub character_id: Option<String>,

    // World-selection context.
    #[serde(default)]
    pub universe_id: Option<String>,
    #[serde(default)]
    pub universe_name: Option<String>,
    #[serde(default)]
    pub world_id: Option<String>,
    #[serde(default)]
    pub world_name: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub region_data: Option<Value>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub user_story_idea: Option<String>,

    // Generated artifacts, opaque to the orchestrator.
    #[serde(default)]
    pub story_ideas: Vec<StoryIdea>,
    #[serde(default)]
    pub selected_story_id: Option<String>,
    #[serde(default)]
    pub story_regeneration_count: u32,
    #[serde(default)]
    pub campaign_core: Option<Value>,
    #[serde(default)]
    pub quests: Vec<Value>,
    #[serde(default)]
    pub places: Vec<Value>,
    #[serde(default)]
    pub scenes: Vec<Value>,
    #[serde(default)]
    pub npcs: Vec<Value>,
    #[serde(default)]
    pub discoveries: Vec<Value>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub challenges: Vec<Value>,

    // World-enrichment side effects created during generation; tracked so
    // deletion can later reference-count them.
    #[serde(default)]
    pub new_species_ids: Vec<String>,
    #[serde(default)]
    pub new_locations: Vec<Value>,
    #[serde(default)]
    pub new_npc_ids: Vec<String>,

    // Approval flags. Core approval is a hard gate; quest/place approval is
    // recorded for audit only under the current gate policy.
    #[serde(default)]
    pub user_approved_core: bool,
    #[serde(default)]
    pub user_approved_quests: bool,
    #[serde(default)]
    pub user_approved_places: bool,

    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub audit_trail: Vec<AuditEntry>,

    pub current_phase: GenerationPhase,
    #[serde(default)]
    pub final_campaign_id: Option<String>,

    // Generation options from the start command.
    #[serde(default = "WorkflowState::default_num_quests")]
    pub num_quests: u32,
    #[serde(default)]
    pub quest_difficulty: Option<String>,
    #[serde(default)]
    pub quest_playtime_minutes: Option<u32>,
    #[serde(default)]
    pub generate_images: bool,

    /// Highest command sequence applied so far; stale commands (lower nonzero
    /// sequence) are rejected instead of silently reprocessed.
    #[serde(default)]
    pub last_sequence: u64,
}

impl WorkflowState {
    fn default_num_quests() -> u32 {
        3
    }

    /// Create fresh state from a validated `start` command.
    pub fn from_command(cmd: &GenerationCommand) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            request_id: cmd.request_id.clone(),
            user_id: cmd.user_id.clone(),
            character_id: cmd.character_id.clone(),
            universe_id: cmd.universe_id.clone(),
            universe_name: cmd.universe_name.clone(),
            world_id: cmd.world_id.clone(),
            world_name: cmd.world_name.clone(),
            region_id: cmd.region_id.clone(),
            region_name: cmd.region_name.clone(),
            region_data: None,
            genre: cmd.genre.clone(),
            user_story_idea: cmd.user_story_idea.clone(),
            story_ideas: Vec::new(),
            selected_story_id: None,
            story_regeneration_count: 0,
            campaign_core: None,
            quests: Vec::new(),
            places: Vec::new(),
            scenes: Vec::new(),
            npcs: Vec::new(),
            discoveries: Vec::new(),
            events: Vec::new(),
            challenges: Vec::new(),
            new_species_ids: Vec::new(),
            new_locations: Vec::new(),
            new_npc_ids: Vec::new(),
            user_approved_core: false,
            user_approved_quests: false,
            user_approved_places: false,
            retry_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            audit_trail: Vec::new(),
            current_phase: GenerationPhase::Init,
            final_campaign_id: None,
            num_quests: cmd.num_quests.unwrap_or_else(Self::default_num_quests),
            quest_difficulty: cmd.quest_difficulty.clone(),
            quest_playtime_minutes: cmd.quest_playtime_minutes,
            generate_images: cmd.generate_images.unwrap_or(false),
            last_sequence: cmd.sequence,
        }
    }

    /// `true` once no further phase execution is permitted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.final_campaign_id.is_some() || self.current_phase.is_terminal()
    }

    /// Append an error entry (append-only, never replaces prior entries).
    pub fn record_error(&mut self, entry: ErrorEntry) {
        self.errors.push(entry);
    }

    /// Append a warning.
    pub fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Append an audit trail entry tagged with the current phase.
    pub fn record_audit(&mut self, action: impl Into<String>, note: impl Into<String>) {
        self.audit_trail.push(AuditEntry::new(
            self.current_phase.as_str(),
            action,
            note,
        ));
    }

    /// Fold one phase output into state and advance `current_phase`.
    ///
    /// `final_campaign_id` is written exactly once; a second `Finalized`
    /// output for the same state is ignored apart from an audit entry.
    pub fn absorb(&mut self, output: PhaseOutput) {
        match output {
            PhaseOutput::StoryIdeas(ideas) => {
                // Regeneration replaces the candidate list wholesale.
                self.story_ideas = ideas;
                self.current_phase = GenerationPhase::StoryGeneration;
            }
            PhaseOutput::CampaignCore(core) => {
                self.campaign_core = Some(core);
                self.current_phase = GenerationPhase::CoreGeneration;
            }
            PhaseOutput::Quests {
                quests,
                new_species_ids,
            } => {
                self.quests = quests;
                self.new_species_ids.extend(new_species_ids);
                self.current_phase = GenerationPhase::QuestGeneration;
            }
            PhaseOutput::Places {
                places,
                new_locations,
            } => {
                self.places = places;
                self.new_locations.extend(new_locations);
                self.current_phase = GenerationPhase::PlaceGeneration;
            }
            PhaseOutput::Scenes {
                scenes,
                npcs,
                discoveries,
                events,
                challenges,
                new_npc_ids,
            } => {
                self.scenes = scenes;
                self.npcs = npcs;
                self.discoveries = discoveries;
                self.events = events;
                self.challenges = challenges;
                self.new_npc_ids.extend(new_npc_ids);
                self.current_phase = GenerationPhase::SceneGeneration;
            }
            PhaseOutput::Finalized { campaign_id } => {
                if self.final_campaign_id.is_none() {
                    self.final_campaign_id = Some(campaign_id);
                    self.current_phase = GenerationPhase::Completed;
                } else {
                    self.record_audit("finalize", "duplicate finalize output ignored");
                }
            }
        }
    }
}

/// Full state of one campaign deletion workflow.
///
/// Terminal once every category has been processed and all three store flags
/// are set. Shared world content (`species_dependencies` /
/// `location_dependencies`) is only removed when its dependency count across
/// *all* campaigns reaches zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeletionState {
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
    pub request_id: String,
    pub campaign_id: String,
    pub user_id: String,

    /// Deleted entity ids, keyed by [`EntityCategory::as_str`].
    #[serde(default)]
    pub deleted: FxHashMap<String, Vec<String>>,

    /// World content the campaign introduced, captured before the teardown
    /// makes it unqueryable. Candidates only; whether each one goes depends on
    /// its reference count at cleanup time.
    #[serde(default)]
    pub species_introduced: Vec<String>,
    #[serde(default)]
    pub locations_introduced: Vec<String>,

    /// Candidates whose reference count reached zero. Shared content never
    /// enters these lists.
    #[serde(default)]
    pub species_to_remove: Vec<String>,
    #[serde(default)]
    pub locations_to_remove: Vec<String>,

    /// Remaining reference counts for shared resources (id → count of other
    /// campaigns still referencing it at cleanup time).
    #[serde(default)]
    pub species_dependencies: FxHashMap<String, u64>,
    #[serde(default)]
    pub location_dependencies: FxHashMap<String, u64>,

    #[serde(default)]
    pub document_deleted: bool,
    #[serde(default)]
    pub graph_deleted: bool,
    #[serde(default)]
    pub relational_deleted: bool,

    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub audit_trail: Vec<AuditEntry>,

    pub current_phase: DeletionPhase,

    /// Highest command sequence applied so far; see
    /// [`WorkflowState::last_sequence`].
    #[serde(default)]
    pub last_sequence: u64,
}

impl DeletionState {
    /// Create fresh state from a validated deletion command.
    pub fn from_command(cmd: &DeletionCommand) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            request_id: cmd.request_id.clone(),
            campaign_id: cmd.campaign_id.clone(),
            user_id: cmd.user_id.clone(),
            deleted: FxHashMap::default(),
            species_introduced: Vec::new(),
            locations_introduced: Vec::new(),
            species_to_remove: Vec::new(),
            locations_to_remove: Vec::new(),
            species_dependencies: FxHashMap::default(),
            location_dependencies: FxHashMap::default(),
            document_deleted: false,
            graph_deleted: false,
            relational_deleted: false,
            warnings: Vec::new(),
            errors: Vec::new(),
            audit_trail: Vec::new(),
            current_phase: DeletionPhase::Init,
            last_sequence: cmd.sequence,
        }
    }

    /// `true` once the teardown finished and all store flags are set.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.current_phase, DeletionPhase::Completed)
            && self.document_deleted
            && self.graph_deleted
            && self.relational_deleted
    }

    /// Record ids removed for one category.
    pub fn record_deleted(&mut self, category: EntityCategory, ids: Vec<String>) {
        self.deleted
            .entry(category.as_str().to_string())
            .or_default()
            .extend(ids);
    }

    /// Total number of entities removed so far, for progress messages.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted.values().map(Vec::len).sum()
    }

    pub fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn record_error(&mut self, entry: ErrorEntry) {
        self.errors.push(entry);
    }

    pub fn record_audit(&mut self, action: impl Into<String>, note: impl Into<String>) {
        self.audit_trail
            .push(AuditEntry::new(self.current_phase.encode(), action, note));
    }
}

/// Read-optimized projection of either workflow kind.
///
/// Written on every transition; the router's idempotency guard reads only
/// this, never the full state. `terminal` covers deletion completion, a
/// failed generation, and explicit cancellation; generation success is
/// signalled by `final_campaign_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressProjection {
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
    pub request_id: String,
    pub user_id: String,
    pub progress_percentage: u8,
    pub step_progress: String,
    pub status_message: String,
    pub current_phase: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub final_campaign_id: Option<String>,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ProgressProjection {
    /// Project generation state.
    pub fn from_generation(state: &WorkflowState) -> Self {
        let phase = state.current_phase;
        Self {
            schema_version: SCHEMA_VERSION,
            request_id: state.request_id.clone(),
            user_id: state.user_id.clone(),
            progress_percentage: phase.progress_percentage(),
            step_progress: format!("{}/{}", phase.step_index(), GenerationPhase::STEP_COUNT),
            status_message: phase.status_message().to_string(),
            current_phase: phase.as_str().to_string(),
            errors: state.errors.iter().map(|e| e.message.clone()).collect(),
            warnings: state.warnings.clone(),
            final_campaign_id: state.final_campaign_id.clone(),
            terminal: state.is_terminal(),
            updated_at: Utc::now(),
        }
    }

    /// Project deletion state.
    pub fn from_deletion(state: &DeletionState) -> Self {
        let phase = state.current_phase;
        Self {
            schema_version: SCHEMA_VERSION,
            request_id: state.request_id.clone(),
            user_id: state.user_id.clone(),
            progress_percentage: phase.progress_percentage(),
            step_progress: format!("{} entities removed", state.deleted_count()),
            status_message: format!("Deleting campaign {}: {}", state.campaign_id, phase),
            current_phase: phase.encode(),
            errors: state.errors.iter().map(|e| e.message.clone()).collect(),
            warnings: state.warnings.clone(),
            final_campaign_id: None,
            terminal: state.is_terminal(),
            updated_at: Utc::now(),
        }
    }

    /// Explicit terminal marker written when a user cancels a paused workflow.
    ///
    /// Once this projection is stored, the idempotency guard turns every
    /// subsequent command for the `request_id` into a no-op.
    pub fn cancelled(request_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            request_id: request_id.into(),
            user_id: user_id.into(),
            progress_percentage: 100,
            step_progress: String::new(),
            status_message: "cancelled by user".to_string(),
            current_phase: "cancelled".to_string(),
            errors: Vec::new(),
            warnings: Vec::new(),
            final_campaign_id: None,
            terminal: true,
            updated_at: Utc::now(),
        }
    }

    /// `true` when the router must suppress any further command for this id.
    #[must_use]
    pub fn blocks_dispatch(&self) -> bool {
        self.final_campaign_id.is_some() || self.terminal
    }
}
