//! The pluggable content generation capability.
//!
//! The orchestrator never talks to a model provider itself. Whatever produces
//! the actual campaign content (an LLM pipeline, a fixture, a replay of
//! recorded outputs) is injected behind [`ContentGenerator`] and treated as a
//! black box that, given the current workflow state, yields one phase's worth
//! of artifacts.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::state::{StoryIdea, WorkflowState};
use crate::types::GenerationPhase;

/// Artifacts produced by one generation phase.
///
/// Payload shapes beyond [`StoryIdea`] are opaque `serde_json::Value`s: the
/// orchestrator stores and forwards them without interpreting their contents.
#[derive(Clone, Debug, PartialEq)]
pub enum PhaseOutput {
    /// Candidate story pitches for the selection gate.
    StoryIdeas(Vec<StoryIdea>),
    /// The campaign core document for the approval gate.
    CampaignCore(Value),
    /// Quest batch plus any species the generator introduced into the world.
    Quests {
        quests: Vec<Value>,
        new_species_ids: Vec<String>,
    },
    /// Places plus any world locations created alongside them.
    Places {
        places: Vec<Value>,
        new_locations: Vec<Value>,
    },
    /// Scenes and their inhabitants.
    Scenes {
        scenes: Vec<Value>,
        npcs: Vec<Value>,
        discoveries: Vec<Value>,
        events: Vec<Value>,
        challenges: Vec<Value>,
        new_npc_ids: Vec<String>,
    },
    /// Final assembly done; the campaign now exists under `campaign_id`.
    Finalized { campaign_id: String },
}

impl PhaseOutput {
    /// The phase this output belongs to, used to cross-check generator
    /// behavior against the plan.
    #[must_use]
    pub fn phase(&self) -> GenerationPhase {
        match self {
            Self::StoryIdeas(_) => GenerationPhase::StoryGeneration,
            Self::CampaignCore(_) => GenerationPhase::CoreGeneration,
            Self::Quests { .. } => GenerationPhase::QuestGeneration,
            Self::Places { .. } => GenerationPhase::PlaceGeneration,
            Self::Scenes { .. } => GenerationPhase::SceneGeneration,
            Self::Finalized { .. } => GenerationPhase::Finalize,
        }
    }
}

/// Failures surfaced by a [`ContentGenerator`].
#[derive(Debug, Error, Diagnostic)]
pub enum GeneratorError {
    #[error("provider failure during {phase}: {message}")]
    #[diagnostic(
        code(questloom::generator::provider),
        help("Transient provider failures are retried with backoff; check provider status if this persists.")
    )]
    Provider {
        phase: GenerationPhase,
        message: String,
        /// Whether the engine may retry this phase.
        retryable: bool,
    },

    #[error("generator produced invalid output for {phase}: {message}")]
    #[diagnostic(code(questloom::generator::invalid_output))]
    InvalidOutput {
        phase: GenerationPhase,
        message: String,
    },

    #[error("phase {phase} is not executable by this generator")]
    #[diagnostic(code(questloom::generator::unsupported_phase))]
    UnsupportedPhase { phase: GenerationPhase },
}

impl GeneratorError {
    /// `true` when the engine should retry the phase with backoff.
    ///
    /// Invalid output and unsupported phases never resolve on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }

    /// The phase the failure occurred in.
    #[must_use]
    pub fn phase(&self) -> GenerationPhase {
        match self {
            Self::Provider { phase, .. }
            | Self::InvalidOutput { phase, .. }
            | Self::UnsupportedPhase { phase } => *phase,
        }
    }
}

/// An injected capability that produces one phase's content from state.
///
/// Implementations read whatever context they need from `state` (genre, the
/// selected story, previously generated artifacts) and must not mutate
/// anything outside their own backends; folding output into state is the
/// engine's job.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn run_phase(
        &self,
        phase: GenerationPhase,
        state: &WorkflowState,
    ) -> Result<PhaseOutput, GeneratorError>;
}
