//! Outbound publishing of progress and notifications.
//!
//! The publisher is stateless: given freshly persisted state and its
//! projection it decides which events the transition warrants and emits them.
//! Publishing is strictly best-effort. A failed emit is logged and swallowed;
//! delivery problems must never abort or fail a workflow whose state has
//! already been persisted.

use std::sync::Arc;

use tracing::warn;

use crate::event_bus::{EventEmitter, OutboundEvent};
use crate::state::{DeletionState, ProgressProjection, WorkflowState};
use crate::types::GenerationPhase;

/// Projects state transitions into outbound events.
#[derive(Clone, Debug)]
pub struct ProgressPublisher {
    emitter: Arc<dyn EventEmitter>,
}

impl ProgressPublisher {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self { emitter }
    }

    fn emit(&self, event: OutboundEvent) {
        if let Err(e) = self.emitter.emit(event) {
            warn!(error = %e, "outbound event dropped");
        }
    }

    /// Publish the progress snapshot plus any phase-specific notification for
    /// a generation transition.
    pub fn publish_generation(&self, state: &WorkflowState, projection: &ProgressProjection) {
        self.emit(OutboundEvent::progress(projection));
        match state.current_phase {
            GenerationPhase::StoryGeneration => {
                self.emit(OutboundEvent::story_selection_ready(
                    &state.request_id,
                    &state.user_id,
                    &state.story_ideas,
                ));
            }
            GenerationPhase::CoreGeneration => {
                if let Some(core) = &state.campaign_core {
                    self.emit(OutboundEvent::core_approval_ready(
                        &state.request_id,
                        &state.user_id,
                        core,
                    ));
                }
            }
            GenerationPhase::Completed => {
                if let Some(campaign_id) = &state.final_campaign_id {
                    self.emit(OutboundEvent::campaign_completed(
                        &state.request_id,
                        &state.user_id,
                        campaign_id,
                    ));
                }
            }
            GenerationPhase::Failed => {
                let message = state
                    .errors
                    .last()
                    .map_or_else(|| "generation failed".to_string(), |e| e.message.clone());
                self.emit(OutboundEvent::campaign_failed(
                    &state.request_id,
                    &state.user_id,
                    message,
                ));
            }
            _ => {}
        }
    }

    /// Publish a deletion transition; completion carries the tally and any
    /// skipped-category warnings.
    pub fn publish_deletion(&self, state: &DeletionState, projection: &ProgressProjection) {
        self.emit(OutboundEvent::deletion_progress(projection));
        if state.is_terminal() {
            self.emit(OutboundEvent::deletion_completed(
                &state.request_id,
                &state.user_id,
                &state.campaign_id,
                state.deleted_count(),
                &state.warnings,
            ));
        }
    }

    /// Publish the cancellation notification for a paused workflow.
    pub fn publish_cancelled(&self, request_id: &str, user_id: &str) {
        self.emit(OutboundEvent::campaign_cancelled(request_id, user_id));
    }

    /// Publish an input error for a command that never reached an engine.
    pub fn publish_input_error(
        &self,
        request_id: Option<String>,
        user_id: Option<String>,
        message: impl Into<String>,
    ) {
        self.emit(OutboundEvent::input_error(request_id, user_id, message));
    }
}
