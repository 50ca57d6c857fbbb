//! The objective cascade engine.
//!
//! Objectives form a three-rank hierarchy per campaign: one campaign objective
//! at the root, quest objectives beneath it, child objectives at the leaves.
//! Gameplay reports child completions; the engine marks the child done,
//! recomputes its quest's percentage, and lets quest completion roll up into
//! the campaign objective, emitting one update event per level that changed
//! and a milestone event when the campaign objective completes.
//!
//! Percentages are pure functions of descendant status, recomputed with
//! `max(old, new)` so progress is monotonic, and duplicate completion events
//! change nothing and emit nothing.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::event_bus::{EventEmitter, OutboundEvent};

/// Quality tier for a rubric-scored completion, on the 1.0–4.0 scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Minimal,
    Good,
    Excellent,
}

impl QualityTier {
    /// Classify a rubric score. Scores are clamped to the 1.0–4.0 scale.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        let score = score.clamp(1.0, 4.0);
        if score < 2.0 {
            Self::Minimal
        } else if score < 3.0 {
            Self::Good
        } else {
            Self::Excellent
        }
    }
}

/// Lifecycle status shared by every objective rank. Never regresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// What kind of gameplay completes a child objective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildKind {
    Discovery,
    Challenge,
    Event,
    Conversation,
}

/// Leaf objective completed directly by gameplay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildObjective {
    pub id: String,
    pub quest_objective_id: String,
    pub kind: ChildKind,
    pub required: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub status: ObjectiveStatus,
    #[serde(default)]
    pub rubric_score: Option<f64>,
    #[serde(default)]
    pub quality: Option<QualityTier>,
}

fn default_weight() -> f64 {
    1.0
}

/// Mid-rank objective; percentage derives from its children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestObjective {
    pub id: String,
    pub campaign_objective_id: String,
    pub status: ObjectiveStatus,
    pub percentage: f64,
}

/// Root objective; percentage derives from its quests. Completion releases
/// the listed content ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignObjective {
    pub id: String,
    pub campaign_id: String,
    pub status: ObjectiveStatus,
    pub percentage: f64,
    #[serde(default)]
    pub unlocks: Vec<String>,
}

/// A gameplay completion report for one child objective.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub campaign_id: String,
    pub user_id: String,
    pub child_objective_id: String,
    pub kind: ChildKind,
    #[serde(default)]
    pub rubric_score: Option<f64>,
}

/// What one cascade pass changed, for callers and assertions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CascadeOutcome {
    pub child_changed: bool,
    pub quest_changed: bool,
    pub campaign_changed: bool,
    pub milestone_reached: bool,
}

impl CascadeOutcome {
    /// `true` when the event was a duplicate and nothing moved.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CascadeError {
    #[error("objective store error: {message}")]
    #[diagnostic(code(questloom::cascade::store))]
    Store { message: String },

    #[error("unknown child objective: {id}")]
    #[diagnostic(
        code(questloom::cascade::unknown_child),
        help("Completion events must reference an objective created with the campaign.")
    )]
    UnknownChild { id: String },

    #[error("child {child_id} references missing quest objective {quest_id}")]
    #[diagnostic(code(questloom::cascade::broken_hierarchy))]
    BrokenHierarchy { child_id: String, quest_id: String },
}

impl CascadeError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

/// Persistence seam for the objective hierarchy.
#[async_trait]
pub trait ObjectiveStore: Send + Sync {
    async fn load_child(&self, id: &str) -> Result<Option<ChildObjective>, CascadeError>;
    async fn save_child(&self, child: &ChildObjective) -> Result<(), CascadeError>;
    async fn children_of_quest(&self, quest_id: &str)
    -> Result<Vec<ChildObjective>, CascadeError>;

    async fn load_quest(&self, id: &str) -> Result<Option<QuestObjective>, CascadeError>;
    async fn save_quest(&self, quest: &QuestObjective) -> Result<(), CascadeError>;
    async fn quests_of_campaign_objective(
        &self,
        campaign_objective_id: &str,
    ) -> Result<Vec<QuestObjective>, CascadeError>;

    async fn load_campaign_objective(
        &self,
        id: &str,
    ) -> Result<Option<CampaignObjective>, CascadeError>;
    async fn save_campaign_objective(
        &self,
        objective: &CampaignObjective,
    ) -> Result<(), CascadeError>;
}

/// Weighted completion percentage of a quest from its children.
///
/// Only required children gate completion; a quest with no required children
/// falls back to weighting all of them. An empty child list is 0.
#[must_use]
pub fn quest_percentage(children: &[ChildObjective]) -> f64 {
    let gating: Vec<&ChildObjective> = {
        let required: Vec<&ChildObjective> = children.iter().filter(|c| c.required).collect();
        if required.is_empty() {
            children.iter().collect()
        } else {
            required
        }
    };
    let total: f64 = gating.iter().map(|c| c.weight.max(0.0)).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let done: f64 = gating
        .iter()
        .filter(|c| c.status == ObjectiveStatus::Completed)
        .map(|c| c.weight.max(0.0))
        .sum();
    (done / total * 100.0).min(100.0)
}

/// Campaign percentage as the mean of its quests' percentages.
#[must_use]
pub fn campaign_percentage(quests: &[QuestObjective]) -> f64 {
    if quests.is_empty() {
        return 0.0;
    }
    let sum: f64 = quests.iter().map(|q| q.percentage.clamp(0.0, 100.0)).sum();
    sum / quests.len() as f64
}

/// Status implied by a percentage. Used with `max(old, new)` so a recompute
/// can never move a status backwards.
#[must_use]
pub fn status_for_percentage(percentage: f64) -> ObjectiveStatus {
    if percentage >= 100.0 {
        ObjectiveStatus::Completed
    } else if percentage > 0.0 {
        ObjectiveStatus::InProgress
    } else {
        ObjectiveStatus::NotStarted
    }
}

/// Applies completion events to the hierarchy and emits update events.
pub struct CascadeEngine {
    objectives: Arc<dyn ObjectiveStore>,
    emitter: Arc<dyn EventEmitter>,
}

impl CascadeEngine {
    pub fn new(objectives: Arc<dyn ObjectiveStore>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self { objectives, emitter }
    }

    fn emit(&self, event: OutboundEvent) {
        if let Err(e) = self.emitter.emit(event) {
            warn!(error = %e, "objective event dropped");
        }
    }

    /// Apply one completion event; returns what changed.
    #[instrument(skip(self, event), fields(child = %event.child_objective_id))]
    pub async fn handle(&self, event: CompletionEvent) -> Result<CascadeOutcome, CascadeError> {
        let mut outcome = CascadeOutcome::default();

        let mut child = self
            .objectives
            .load_child(&event.child_objective_id)
            .await?
            .ok_or_else(|| CascadeError::UnknownChild {
                id: event.child_objective_id.clone(),
            })?;

        let quality = event.rubric_score.map(QualityTier::from_score);
        let rubric_improved = match (event.rubric_score, child.rubric_score) {
            (Some(new), Some(old)) => new > old,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if child.status == ObjectiveStatus::Completed && !rubric_improved {
            debug!("duplicate completion, cascade is a no-op");
            return Ok(outcome);
        }

        child.status = ObjectiveStatus::Completed;
        if rubric_improved {
            child.rubric_score = event.rubric_score;
            child.quality = quality;
        }
        self.objectives.save_child(&child).await?;
        outcome.child_changed = true;
        self.emit(OutboundEvent::objective_progress(
            &event.user_id,
            &event.campaign_id,
            "child",
            &child.id,
            100.0,
            child.status,
        ));

        let mut quest = self
            .objectives
            .load_quest(&child.quest_objective_id)
            .await?
            .ok_or_else(|| CascadeError::BrokenHierarchy {
                child_id: child.id.clone(),
                quest_id: child.quest_objective_id.clone(),
            })?;

        let children = self
            .objectives
            .children_of_quest(&quest.id)
            .await?;
        let recomputed = quest_percentage(&children).max(quest.percentage);
        let quest_was_complete = quest.status == ObjectiveStatus::Completed;
        if recomputed > quest.percentage || status_for_percentage(recomputed) > quest.status {
            quest.percentage = recomputed;
            quest.status = quest.status.max(status_for_percentage(recomputed));
            self.objectives.save_quest(&quest).await?;
            outcome.quest_changed = true;
            self.emit(OutboundEvent::objective_progress(
                &event.user_id,
                &event.campaign_id,
                "quest",
                &quest.id,
                quest.percentage,
                quest.status,
            ));
        }

        // Campaign rollup only moves when a quest newly completes.
        if quest.status == ObjectiveStatus::Completed && !quest_was_complete {
            let mut campaign = match self
                .objectives
                .load_campaign_objective(&quest.campaign_objective_id)
                .await?
            {
                Some(c) => c,
                None => return Ok(outcome),
            };
            let quests = self
                .objectives
                .quests_of_campaign_objective(&campaign.id)
                .await?;
            let recomputed = campaign_percentage(&quests).max(campaign.percentage);
            let campaign_was_complete = campaign.status == ObjectiveStatus::Completed;
            if recomputed > campaign.percentage
                || status_for_percentage(recomputed) > campaign.status
            {
                campaign.percentage = recomputed;
                campaign.status = campaign.status.max(status_for_percentage(recomputed));
                self.objectives.save_campaign_objective(&campaign).await?;
                outcome.campaign_changed = true;
                self.emit(OutboundEvent::objective_progress(
                    &event.user_id,
                    &event.campaign_id,
                    "campaign",
                    &campaign.id,
                    campaign.percentage,
                    campaign.status,
                ));
                if campaign.status == ObjectiveStatus::Completed && !campaign_was_complete {
                    outcome.milestone_reached = true;
                    self.emit(OutboundEvent::milestone_reached(
                        &event.user_id,
                        &event.campaign_id,
                        &campaign.id,
                        &campaign.unlocks,
                    ));
                }
            }
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for CascadeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeEngine").finish()
    }
}

/// Map-backed [`ObjectiveStore`] for tests and single-process use.
#[derive(Default)]
pub struct InMemoryObjectiveStore {
    children: RwLock<FxHashMap<String, ChildObjective>>,
    quests: RwLock<FxHashMap<String, QuestObjective>>,
    campaigns: RwLock<FxHashMap<String, CampaignObjective>>,
}

impl InMemoryObjectiveStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a full hierarchy.
    pub fn seed(
        &self,
        campaign: CampaignObjective,
        quests: Vec<QuestObjective>,
        children: Vec<ChildObjective>,
    ) {
        self.campaigns
            .write()
            .insert(campaign.id.clone(), campaign);
        let mut quest_map = self.quests.write();
        for quest in quests {
            quest_map.insert(quest.id.clone(), quest);
        }
        let mut child_map = self.children.write();
        for child in children {
            child_map.insert(child.id.clone(), child);
        }
    }
}

#[async_trait]
impl ObjectiveStore for InMemoryObjectiveStore {
    async fn load_child(&self, id: &str) -> Result<Option<ChildObjective>, CascadeError> {
        Ok(self.children.read().get(id).cloned())
    }

    async fn save_child(&self, child: &ChildObjective) -> Result<(), CascadeError> {
        self.children
            .write()
            .insert(child.id.clone(), child.clone());
        Ok(())
    }

    async fn children_of_quest(
        &self,
        quest_id: &str,
    ) -> Result<Vec<ChildObjective>, CascadeError> {
        Ok(self
            .children
            .read()
            .values()
            .filter(|c| c.quest_objective_id == quest_id)
            .cloned()
            .collect())
    }

    async fn load_quest(&self, id: &str) -> Result<Option<QuestObjective>, CascadeError> {
        Ok(self.quests.read().get(id).cloned())
    }

    async fn save_quest(&self, quest: &QuestObjective) -> Result<(), CascadeError> {
        self.quests.write().insert(quest.id.clone(), quest.clone());
        Ok(())
    }

    async fn quests_of_campaign_objective(
        &self,
        campaign_objective_id: &str,
    ) -> Result<Vec<QuestObjective>, CascadeError> {
        Ok(self
            .quests
            .read()
            .values()
            .filter(|q| q.campaign_objective_id == campaign_objective_id)
            .cloned()
            .collect())
    }

    async fn load_campaign_objective(
        &self,
        id: &str,
    ) -> Result<Option<CampaignObjective>, CascadeError> {
        Ok(self.campaigns.read().get(id).cloned())
    }

    async fn save_campaign_objective(
        &self,
        objective: &CampaignObjective,
    ) -> Result<(), CascadeError> {
        self.campaigns
            .write()
            .insert(objective.id.clone(), objective.clone());
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryObjectiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectiveStore")
            .field("children", &self.children.read().len())
            .field("quests", &self.quests.read().len())
            .field("campaigns", &self.campaigns.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rubric_tiers_match_thresholds() {
        assert_eq!(QualityTier::from_score(1.0), QualityTier::Minimal);
        assert_eq!(QualityTier::from_score(1.99), QualityTier::Minimal);
        assert_eq!(QualityTier::from_score(2.0), QualityTier::Good);
        assert_eq!(QualityTier::from_score(2.99), QualityTier::Good);
        assert_eq!(QualityTier::from_score(3.0), QualityTier::Excellent);
        assert_eq!(QualityTier::from_score(3.5), QualityTier::Excellent);
        // Out-of-scale scores clamp instead of misclassifying.
        assert_eq!(QualityTier::from_score(0.2), QualityTier::Minimal);
        assert_eq!(QualityTier::from_score(9.0), QualityTier::Excellent);
    }

    fn child(id: &str, required: bool, weight: f64, status: ObjectiveStatus) -> ChildObjective {
        ChildObjective {
            id: id.to_string(),
            quest_objective_id: "q1".to_string(),
            kind: ChildKind::Discovery,
            required,
            weight,
            status,
            rubric_score: None,
            quality: None,
        }
    }

    #[test]
    fn quest_percentage_weights_required_children() {
        let children = vec![
            child("a", true, 3.0, ObjectiveStatus::Completed),
            child("b", true, 1.0, ObjectiveStatus::NotStarted),
            // Optional children never gate completion.
            child("c", false, 10.0, ObjectiveStatus::NotStarted),
        ];
        assert!((quest_percentage(&children) - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn quest_percentage_falls_back_to_all_children() {
        let children = vec![
            child("a", false, 1.0, ObjectiveStatus::Completed),
            child("b", false, 1.0, ObjectiveStatus::NotStarted),
        ];
        assert!((quest_percentage(&children) - 50.0).abs() < f64::EPSILON);
        assert!(quest_percentage(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn status_never_regresses_under_max() {
        let current = ObjectiveStatus::Completed;
        assert_eq!(current.max(status_for_percentage(40.0)), ObjectiveStatus::Completed);
    }
}
