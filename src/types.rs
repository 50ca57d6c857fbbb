//! Core types for the questloom orchestration crate.
//!
//! This module defines the fundamental vocabulary shared by the router and the
//! workflow engines: the generation phase machine, the deletion phase machine,
//! the entity categories torn down during deletion, and the inbound workflow
//! actions.
//!
//! All of these types carry stable string encodings (`as_str`/`encode` plus a
//! forgiving parse) so they can live inside persisted JSON and message bodies
//! without tying the wire format to Rust enum layout.
//!
//! # Examples
//!
//! ```rust
//! use questloom::types::{GenerationPhase, WorkflowAction};
//!
//! let phase = GenerationPhase::StoryGeneration;
//! assert_eq!(phase.as_str(), "story_generation");
//! assert!(phase.is_gate());
//! assert!(!phase.is_terminal());
//!
//! let action = WorkflowAction::parse("select_story").unwrap();
//! assert_eq!(action, WorkflowAction::SelectStory);
//! assert!(WorkflowAction::parse("explode").is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of the campaign generation workflow.
///
/// The machine is linear with two human gates:
///
/// ```text
/// init → story_generation → [gate: select_story] → core_generation
///      → [gate: approve_core] → quest_generation → place_generation
///      → scene_generation → finalize → completed
/// ```
///
/// `current_phase` in persisted state is the *last executed* phase; a gate is
/// a phase whose completion pauses the workflow until the next command for the
/// same `request_id` arrives. `Failed` is the terminal state reached when a
/// phase exhausts its retries or hits an unrecoverable error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    /// Workflow created, nothing executed yet.
    Init,
    /// Story ideas produced; pauses for `select_story`.
    StoryGeneration,
    /// Campaign core produced; pauses for `approve_core`.
    CoreGeneration,
    /// Quest batch produced.
    QuestGeneration,
    /// Places produced.
    PlaceGeneration,
    /// Scenes plus scene content (NPCs, discoveries, events, challenges).
    SceneGeneration,
    /// Assembly of the final campaign record.
    Finalize,
    /// Terminal success; `final_campaign_id` is set.
    Completed,
    /// Terminal failure; `errors` explain why. State is kept for inspection.
    Failed,
}

impl GenerationPhase {
    /// Number of steps counted by [`step_index`](Self::step_index).
    pub const STEP_COUNT: u8 = 7;

    /// Stable snake_case form used in projections and message payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::StoryGeneration => "story_generation",
            Self::CoreGeneration => "core_generation",
            Self::QuestGeneration => "quest_generation",
            Self::PlaceGeneration => "place_generation",
            Self::SceneGeneration => "scene_generation",
            Self::Finalize => "finalize",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the snake_case form back into a phase.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "init" => Self::Init,
            "story_generation" => Self::StoryGeneration,
            "core_generation" => Self::CoreGeneration,
            "quest_generation" => Self::QuestGeneration,
            "place_generation" => Self::PlaceGeneration,
            "scene_generation" => Self::SceneGeneration,
            "finalize" => Self::Finalize,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    /// `true` for phases whose completion pauses the workflow for a follow-up
    /// command (story selection, core approval).
    #[must_use]
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::StoryGeneration | Self::CoreGeneration)
    }

    /// `true` once no further phase execution is permitted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Zero-based position in the linear machine, used for `step_progress`.
    #[must_use]
    pub fn step_index(&self) -> u8 {
        match self {
            Self::Init => 0,
            Self::StoryGeneration => 1,
            Self::CoreGeneration => 2,
            Self::QuestGeneration => 3,
            Self::PlaceGeneration => 4,
            Self::SceneGeneration => 5,
            Self::Finalize => 6,
            Self::Completed | Self::Failed => 7,
        }
    }

    /// Coarse completion percentage reported by the progress projection.
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::Init => 0,
            Self::StoryGeneration => 20,
            Self::CoreGeneration => 40,
            Self::QuestGeneration => 55,
            Self::PlaceGeneration => 70,
            Self::SceneGeneration => 85,
            Self::Finalize => 95,
            Self::Completed | Self::Failed => 100,
        }
    }

    /// Human-readable status line for the progress projection.
    #[must_use]
    pub fn status_message(&self) -> &'static str {
        match self {
            Self::Init => "Preparing campaign generation",
            Self::StoryGeneration => "Story ideas ready for selection",
            Self::CoreGeneration => "Campaign core ready for approval",
            Self::QuestGeneration => "Generating quests",
            Self::PlaceGeneration => "Generating places",
            Self::SceneGeneration => "Generating scenes and inhabitants",
            Self::Finalize => "Assembling final campaign",
            Self::Completed => "Campaign generation completed",
            Self::Failed => "Campaign generation failed",
        }
    }
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound actions understood by the generation side of the dispatch table.
///
/// Unknown action strings must surface as input errors carrying the sender's
/// `request_id`; that is why the command decoder parses the raw string with
/// [`WorkflowAction::parse`] instead of failing inside serde.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Start,
    SelectStory,
    RegenerateStories,
    ApproveCore,
    ApproveQuests,
    ApprovePlaces,
    Finalize,
}

impl WorkflowAction {
    /// Stable snake_case wire form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::SelectStory => "select_story",
            Self::RegenerateStories => "regenerate_stories",
            Self::ApproveCore => "approve_core",
            Self::ApproveQuests => "approve_quests",
            Self::ApprovePlaces => "approve_places",
            Self::Finalize => "finalize",
        }
    }

    /// Parse a wire action string; `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "start" => Self::Start,
            "select_story" => Self::SelectStory,
            "regenerate_stories" => Self::RegenerateStories,
            "approve_core" => Self::ApproveCore,
            "approve_quests" => Self::ApproveQuests,
            "approve_places" => Self::ApprovePlaces,
            "finalize" => Self::Finalize,
            _ => return None,
        })
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity categories removed during campaign deletion.
///
/// [`EntityCategory::DELETION_ORDER`] fixes the teardown sequence: leaf scene
/// content first, then NPCs, scenes, places, quests. The campaign root and
/// world-content cleanup are separate deletion phases, not categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Discovery,
    Event,
    Challenge,
    Knowledge,
    Item,
    Rubric,
    Npc,
    Scene,
    Place,
    Quest,
}

impl EntityCategory {
    /// Children-before-parents teardown order.
    pub const DELETION_ORDER: [EntityCategory; 10] = [
        Self::Discovery,
        Self::Event,
        Self::Challenge,
        Self::Knowledge,
        Self::Item,
        Self::Rubric,
        Self::Npc,
        Self::Scene,
        Self::Place,
        Self::Quest,
    ];

    /// Stable snake_case form used as a map key in persisted deletion state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Event => "event",
            Self::Challenge => "challenge",
            Self::Knowledge => "knowledge",
            Self::Item => "item",
            Self::Rubric => "rubric",
            Self::Npc => "npc",
            Self::Scene => "scene",
            Self::Place => "place",
            Self::Quest => "quest",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases of the deletion workflow.
///
/// Encoded as strings for persistence (`"delete:npc"` style for category
/// phases) with a forward-compatible fallback to `Init` on unknown input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DeletionPhase {
    /// Deletion requested, nothing removed yet.
    Init,
    /// Removing one entity category across the content stores.
    Category(EntityCategory),
    /// Removing the campaign root record.
    CampaignRoot,
    /// Reference-counted cleanup of campaign-introduced world content.
    WorldCleanup,
    /// Terminal: every category processed and all store flags set.
    Completed,
}

impl DeletionPhase {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Init => "init".to_string(),
            Self::Category(cat) => format!("delete:{cat}"),
            Self::CampaignRoot => "campaign_root".to_string(),
            Self::WorldCleanup => "world_cleanup".to_string(),
            Self::Completed => "completed".to_string(),
        }
    }

    /// Decode the persisted string form; unknown inputs fall back to `Init`.
    pub fn decode(s: &str) -> Self {
        match s {
            "init" => Self::Init,
            "campaign_root" => Self::CampaignRoot,
            "world_cleanup" => Self::WorldCleanup,
            "completed" => Self::Completed,
            other => match other.strip_prefix("delete:") {
                Some("discovery") => Self::Category(EntityCategory::Discovery),
                Some("event") => Self::Category(EntityCategory::Event),
                Some("challenge") => Self::Category(EntityCategory::Challenge),
                Some("knowledge") => Self::Category(EntityCategory::Knowledge),
                Some("item") => Self::Category(EntityCategory::Item),
                Some("rubric") => Self::Category(EntityCategory::Rubric),
                Some("npc") => Self::Category(EntityCategory::Npc),
                Some("scene") => Self::Category(EntityCategory::Scene),
                Some("place") => Self::Category(EntityCategory::Place),
                Some("quest") => Self::Category(EntityCategory::Quest),
                _ => Self::Init,
            },
        }
    }

    /// Coarse completion percentage for the deletion progress projection.
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Category(cat) => {
                let pos = EntityCategory::DELETION_ORDER
                    .iter()
                    .position(|c| c == cat)
                    .unwrap_or(0) as u32;
                // Categories span 5..=80.
                (5 + (pos + 1) * 75 / EntityCategory::DELETION_ORDER.len() as u32) as u8
            }
            Self::CampaignRoot => 85,
            Self::WorldCleanup => 95,
            Self::Completed => 100,
        }
    }
}

impl From<DeletionPhase> for String {
    fn from(p: DeletionPhase) -> Self {
        p.encode()
    }
}

impl From<String> for DeletionPhase {
    fn from(s: String) -> Self {
        Self::decode(&s)
    }
}

impl fmt::Display for DeletionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
