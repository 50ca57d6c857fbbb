//! The campaign generation workflow engine.
//!
//! The phase machine is explicit: [`plan_transition`] is a pure function from
//! (last executed phase, inbound action) to the list of phases to execute
//! next. The engine then walks that plan one phase at a time, and after every
//! phase persists state before publishing progress. A plan ending at a gate
//! simply ends; nothing waits in memory for the follow-up command, which
//! arrives hours later against reloaded state.
//!
//! Phase execution failures are captured into state (bounded retries, then the
//! `Failed` terminal phase) rather than returned; only storage failures and
//! command-level rejections surface as `Err` to the router.

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use rand::Rng;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::command::GenerationCommand;
use crate::generator::{ContentGenerator, GeneratorError};
use crate::publisher::ProgressPublisher;
use crate::state::{ErrorEntry, WorkflowState};
use crate::store::{StoreError, WorkflowStore};
use crate::types::{GenerationPhase, WorkflowAction};

/// Default number of attempts per phase (1 initial + 2 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff between attempts.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Command-level failures returned to the router.
#[derive(Debug, Error, Diagnostic)]
pub enum GenerationError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("no workflow state for request {request_id}")]
    #[diagnostic(
        code(questloom::generation::unknown_request),
        help("Follow-up actions require prior state; it may have expired or never existed.")
    )]
    UnknownRequest { request_id: String },

    #[error("workflow {request_id} is already terminal")]
    #[diagnostic(code(questloom::generation::already_terminal))]
    AlreadyTerminal { request_id: String },

    #[error("workflow {request_id} already exists; duplicate start rejected")]
    #[diagnostic(
        code(questloom::generation::duplicate_start),
        help("A start command may not replace an in-flight workflow; use a new request_id.")
    )]
    DuplicateStart { request_id: String },

    #[error("stale command for {request_id}: sequence {got} < last applied {last}")]
    #[diagnostic(
        code(questloom::generation::stale_command),
        help("A newer command for this workflow was already applied; this one is dropped.")
    )]
    StaleCommand {
        request_id: String,
        got: u64,
        last: u64,
    },

    #[error("action {action} is not valid while in phase {phase}")]
    #[diagnostic(code(questloom::generation::invalid_transition))]
    InvalidTransition {
        phase: GenerationPhase,
        action: WorkflowAction,
    },

    #[error("story {story_id} is not among the candidates for {request_id}")]
    #[diagnostic(code(questloom::generation::invalid_selection))]
    InvalidSelection {
        request_id: String,
        story_id: String,
    },
}

/// Pure transition planner for the generation machine.
///
/// Given the last executed phase and the inbound action, returns the phases to
/// execute now, in order. An empty plan is a valid outcome (audit-only
/// approvals). Invalid combinations are rejected without touching state.
pub fn plan_transition(
    phase: GenerationPhase,
    action: WorkflowAction,
) -> Result<Vec<GenerationPhase>, GenerationError> {
    use GenerationPhase as P;
    use WorkflowAction as A;

    let plan = match (phase, action) {
        (P::Init, A::Start) => vec![P::StoryGeneration],
        // Regeneration replaces the candidate list and pauses again.
        (P::StoryGeneration, A::RegenerateStories) => vec![P::StoryGeneration],
        // Selection runs up to the next gate.
        (P::StoryGeneration, A::SelectStory) => vec![P::CoreGeneration],
        // Core approval runs the rest of the pipeline without pausing.
        (P::CoreGeneration, A::ApproveCore) => vec![
            P::QuestGeneration,
            P::PlaceGeneration,
            P::SceneGeneration,
            P::Finalize,
        ],
        // Audit-only approvals: recorded, nothing executes.
        (p, A::ApproveQuests) if !p.is_terminal() && p != P::Init => vec![],
        (p, A::ApprovePlaces) if !p.is_terminal() && p != P::Init => vec![],
        // Explicit finalize retries assembly after a mid-pipeline resume.
        (P::SceneGeneration, A::Finalize) => vec![P::Finalize],
        (phase, action) => return Err(GenerationError::InvalidTransition { phase, action }),
    };
    Ok(plan)
}

/// Executes generation commands against durable state.
pub struct GenerationEngine {
    store: WorkflowStore,
    generator: Arc<dyn ContentGenerator>,
    publisher: ProgressPublisher,
    max_attempts: u32,
    retry_base_delay: Duration,
}

impl GenerationEngine {
    pub fn new(
        store: WorkflowStore,
        generator: Arc<dyn ContentGenerator>,
        publisher: ProgressPublisher,
    ) -> Self {
        Self {
            store,
            generator,
            publisher,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Handle one validated generation command end to end.
    #[instrument(
        skip(self, cmd),
        fields(request_id = %cmd.request_id, action = %cmd.workflow_action)
    )]
    pub async fn handle(&self, cmd: GenerationCommand) -> Result<(), GenerationError> {
        let mut state = self.load_or_create(&cmd).await?;
        self.guard_sequence(&mut state, &cmd)?;
        self.apply_action(&mut state, &cmd)?;

        let plan = plan_transition(state.current_phase, cmd.workflow_action)?;
        if plan.is_empty() {
            // Nothing executes, but the action itself (audit, flags) must
            // still be durable and visible.
            let projection = self.store.checkpoint_generation(&state).await?;
            self.publisher.publish_generation(&state, &projection);
            return Ok(());
        }

        // Persist the accepted command before executing anything, so a crash
        // mid-phase resumes from a state that already reflects it.
        self.store.save_generation(&state).await?;

        for phase in plan {
            match self.run_phase_with_retries(phase, &mut state).await {
                Ok(output) => {
                    state.absorb(output);
                    state.record_audit("phase_completed", phase.as_str());
                    let projection = self.store.checkpoint_generation(&state).await?;
                    self.publisher.publish_generation(&state, &projection);
                }
                Err(err) => {
                    warn!(phase = %phase, error = %err, "phase exhausted, failing workflow");
                    state.record_error(
                        ErrorEntry::new(phase.as_str(), err.to_string())
                            .with_details(serde_json::json!({ "attempts": self.max_attempts })),
                    );
                    state.current_phase = GenerationPhase::Failed;
                    let projection = self.store.checkpoint_generation(&state).await?;
                    self.publisher.publish_generation(&state, &projection);
                    return Ok(());
                }
            }
        }

        if state.current_phase.is_gate() {
            info!(phase = %state.current_phase, "workflow paused at gate");
        }
        Ok(())
    }

    async fn load_or_create(
        &self,
        cmd: &GenerationCommand,
    ) -> Result<WorkflowState, GenerationError> {
        if cmd.workflow_action == WorkflowAction::Start {
            // A start may never replace in-flight state; a redelivered start
            // must not wipe selections or approvals already made.
            if self.store.load_generation(&cmd.request_id).await?.is_some() {
                return Err(GenerationError::DuplicateStart {
                    request_id: cmd.request_id.clone(),
                });
            }
            let mut state = WorkflowState::from_command(cmd);
            state.record_audit("command_accepted", "start");
            return Ok(state);
        }
        let state = self
            .store
            .load_generation(&cmd.request_id)
            .await?
            .ok_or_else(|| GenerationError::UnknownRequest {
                request_id: cmd.request_id.clone(),
            })?;
        if state.is_terminal() {
            return Err(GenerationError::AlreadyTerminal {
                request_id: cmd.request_id.clone(),
            });
        }
        Ok(state)
    }

    /// Reject commands numbered below what state has already seen. Sequence 0
    /// means the sender does not number commands and is never checked.
    fn guard_sequence(
        &self,
        state: &mut WorkflowState,
        cmd: &GenerationCommand,
    ) -> Result<(), GenerationError> {
        if cmd.sequence != 0 {
            if cmd.sequence < state.last_sequence {
                return Err(GenerationError::StaleCommand {
                    request_id: cmd.request_id.clone(),
                    got: cmd.sequence,
                    last: state.last_sequence,
                });
            }
            state.last_sequence = cmd.sequence;
        }
        Ok(())
    }

    /// Fold the action's own effects (selection, flags, counters) into state.
    fn apply_action(
        &self,
        state: &mut WorkflowState,
        cmd: &GenerationCommand,
    ) -> Result<(), GenerationError> {
        match cmd.workflow_action {
            WorkflowAction::Start => {}
            WorkflowAction::SelectStory => {
                let story_id = cmd.selected_story_id.clone().ok_or_else(|| {
                    GenerationError::InvalidSelection {
                        request_id: cmd.request_id.clone(),
                        story_id: "<none provided>".to_string(),
                    }
                })?;
                if !state.story_ideas.iter().any(|s| s.id == story_id) {
                    return Err(GenerationError::InvalidSelection {
                        request_id: cmd.request_id.clone(),
                        story_id,
                    });
                }
                state.selected_story_id = Some(story_id.clone());
                state.record_audit("story_selected", story_id);
            }
            WorkflowAction::RegenerateStories => {
                state.story_regeneration_count += 1;
                state.record_audit(
                    "stories_regenerated",
                    format!("round {}", state.story_regeneration_count),
                );
            }
            WorkflowAction::ApproveCore => {
                state.user_approved_core = true;
                state.record_audit("core_approved", "");
            }
            WorkflowAction::ApproveQuests => {
                state.user_approved_quests = true;
                state.record_audit("quests_approved", "");
            }
            WorkflowAction::ApprovePlaces => {
                state.user_approved_places = true;
                state.record_audit("places_approved", "");
            }
            WorkflowAction::Finalize => {
                state.record_audit("finalize_requested", "");
            }
        }
        Ok(())
    }

    /// Run one phase with bounded retries and jittered exponential backoff.
    #[instrument(skip(self, state), fields(request_id = %state.request_id))]
    async fn run_phase_with_retries(
        &self,
        phase: GenerationPhase,
        state: &mut WorkflowState,
    ) -> Result<crate::generator::PhaseOutput, GeneratorError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.generator.run_phase(phase, state).await {
                Ok(output) => {
                    if output.phase() != phase {
                        return Err(GeneratorError::InvalidOutput {
                            phase,
                            message: format!(
                                "generator returned output for {}",
                                output.phase()
                            ),
                        });
                    }
                    return Ok(output);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    state.retry_count += 1;
                    state.record_warning(format!(
                        "{phase} attempt {attempt} failed, retrying: {err}"
                    ));
                    warn!(phase = %phase, attempt, error = %err, "retrying phase");
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1 << attempt.min(8));
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(exp + jitter)
    }
}

impl std::fmt::Debug for GenerationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationEngine")
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_plans_story_generation_only() {
        let plan = plan_transition(GenerationPhase::Init, WorkflowAction::Start).unwrap();
        assert_eq!(plan, vec![GenerationPhase::StoryGeneration]);
    }

    #[test]
    fn approve_core_runs_to_completion() {
        let plan =
            plan_transition(GenerationPhase::CoreGeneration, WorkflowAction::ApproveCore).unwrap();
        assert_eq!(
            plan,
            vec![
                GenerationPhase::QuestGeneration,
                GenerationPhase::PlaceGeneration,
                GenerationPhase::SceneGeneration,
                GenerationPhase::Finalize,
            ]
        );
    }

    #[test]
    fn select_story_pauses_at_core_gate() {
        let plan =
            plan_transition(GenerationPhase::StoryGeneration, WorkflowAction::SelectStory)
                .unwrap();
        assert_eq!(plan, vec![GenerationPhase::CoreGeneration]);
    }

    #[test]
    fn quest_approval_is_audit_only() {
        let plan =
            plan_transition(GenerationPhase::QuestGeneration, WorkflowAction::ApproveQuests)
                .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn out_of_order_actions_are_rejected() {
        assert!(matches!(
            plan_transition(GenerationPhase::Init, WorkflowAction::ApproveCore),
            Err(GenerationError::InvalidTransition { .. })
        ));
        assert!(matches!(
            plan_transition(GenerationPhase::Completed, WorkflowAction::SelectStory),
            Err(GenerationError::InvalidTransition { .. })
        ));
        assert!(matches!(
            plan_transition(GenerationPhase::StoryGeneration, WorkflowAction::Start),
            Err(GenerationError::InvalidTransition { .. })
        ));
    }
}
