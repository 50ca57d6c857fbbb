use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::state::{ProgressProjection, StoryIdea};

/// Outbound event categories; each maps to a per-user topic segment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Generation progress snapshots.
    Progress,
    /// Gate and terminal notifications (selection ready, approval ready,
    /// completed, failed, cancelled).
    Notification,
    /// Deletion progress and completion.
    DeletionProgress,
    /// Objective cascade updates and milestones.
    ObjectiveUpdate,
    /// Input errors for commands that never created workflow state.
    Error,
}

impl EventKind {
    /// Default topic segment for `user:{user_id}:{segment}` routing.
    ///
    /// Notification-class events override this with their label so that each
    /// gate and terminal outcome gets its own topic; a consumer can subscribe
    /// to `user:{id}:core_approval_ready` without sifting a shared channel.
    #[must_use]
    pub fn topic_segment(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Notification => "notification",
            Self::DeletionProgress => "deletion_progress",
            Self::ObjectiveUpdate => "objectives",
            Self::Error => "error",
        }
    }
}

/// One event published toward a user.
///
/// `label` names the specific occurrence within the kind (for example
/// `"story_selection_ready"` within `Notification`); `payload` carries the
/// kind-specific body and stays opaque to the bus and sinks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OutboundEvent {
    pub kind: EventKind,
    pub label: String,
    /// Absent for input errors from bodies with no usable `request_id`.
    pub request_id: Option<String>,
    /// Absent only for unattributable input errors; such events go to an
    /// operator topic instead of a user topic.
    pub user_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl OutboundEvent {
    pub fn new(
        kind: EventKind,
        label: impl Into<String>,
        request_id: Option<String>,
        user_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            label: label.into(),
            request_id,
            user_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// The topic this event is delivered on.
    ///
    /// Snapshot streams (`progress`, `deletion_progress`, `objectives`,
    /// `error`) share one segment per kind; notifications and the deletion
    /// completion use their label as the segment so downstream consumers can
    /// subscribe narrowly.
    #[must_use]
    pub fn topic(&self) -> String {
        let segment = match self.kind {
            EventKind::Notification => self.label.as_str(),
            EventKind::DeletionProgress if self.label == "deletion_completed" => {
                self.label.as_str()
            }
            _ => self.kind.topic_segment(),
        };
        match &self.user_id {
            Some(user_id) => format!("user:{user_id}:{segment}"),
            None => format!("system:{segment}"),
        }
    }

    /// Generation progress snapshot.
    pub fn progress(projection: &ProgressProjection) -> Self {
        Self::new(
            EventKind::Progress,
            "progress",
            Some(projection.request_id.clone()),
            Some(projection.user_id.clone()),
            json!(projection),
        )
    }

    /// Story candidates are ready for the selection gate.
    pub fn story_selection_ready(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        ideas: &[StoryIdea],
    ) -> Self {
        Self::new(
            EventKind::Notification,
            "story_selection_ready",
            Some(request_id.into()),
            Some(user_id.into()),
            json!({ "story_ideas": ideas }),
        )
    }

    /// The campaign core is ready for the approval gate.
    pub fn core_approval_ready(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        core: &Value,
    ) -> Self {
        Self::new(
            EventKind::Notification,
            "core_approval_ready",
            Some(request_id.into()),
            Some(user_id.into()),
            json!({ "campaign_core": core }),
        )
    }

    /// Terminal success with the final campaign id.
    pub fn campaign_completed(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        campaign_id: impl Into<String>,
    ) -> Self {
        Self::new(
            EventKind::Notification,
            "campaign_completed",
            Some(request_id.into()),
            Some(user_id.into()),
            json!({ "campaign_id": campaign_id.into() }),
        )
    }

    /// Terminal failure with the message that exhausted the workflow.
    pub fn campaign_failed(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            EventKind::Notification,
            "campaign_failed",
            Some(request_id.into()),
            Some(user_id.into()),
            json!({ "message": message.into() }),
        )
    }

    /// A paused workflow was cancelled by its user.
    pub fn campaign_cancelled(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::new(
            EventKind::Notification,
            "campaign_cancelled",
            Some(request_id.into()),
            Some(user_id.into()),
            Value::Null,
        )
    }

    /// Deletion progress snapshot.
    pub fn deletion_progress(projection: &ProgressProjection) -> Self {
        Self::new(
            EventKind::DeletionProgress,
            "deletion_progress",
            Some(projection.request_id.clone()),
            Some(projection.user_id.clone()),
            json!(projection),
        )
    }

    /// Deletion finished; `warnings` lists any categories that were skipped.
    pub fn deletion_completed(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        campaign_id: impl Into<String>,
        deleted_count: usize,
        warnings: &[String],
    ) -> Self {
        Self::new(
            EventKind::DeletionProgress,
            "deletion_completed",
            Some(request_id.into()),
            Some(user_id.into()),
            json!({
                "campaign_id": campaign_id.into(),
                "deleted_count": deleted_count,
                "warnings": warnings,
            }),
        )
    }

    /// One objective level changed during a cascade.
    pub fn objective_progress(
        user_id: impl Into<String>,
        campaign_id: impl Into<String>,
        level: &'static str,
        objective_id: impl Into<String>,
        percentage: f64,
        status: impl Serialize,
    ) -> Self {
        Self::new(
            EventKind::ObjectiveUpdate,
            "objective_progress",
            None,
            Some(user_id.into()),
            json!({
                "campaign_id": campaign_id.into(),
                "level": level,
                "objective_id": objective_id.into(),
                "percentage": percentage,
                "status": status,
            }),
        )
    }

    /// A campaign objective completed; `unlocks` lists released content ids.
    pub fn milestone_reached(
        user_id: impl Into<String>,
        campaign_id: impl Into<String>,
        objective_id: impl Into<String>,
        unlocks: &[String],
    ) -> Self {
        Self::new(
            EventKind::ObjectiveUpdate,
            "milestone_reached",
            None,
            Some(user_id.into()),
            json!({
                "campaign_id": campaign_id.into(),
                "objective_id": objective_id.into(),
                "unlocks": unlocks,
            }),
        )
    }

    /// Input error for a command that never created workflow state.
    pub fn input_error(
        request_id: Option<String>,
        user_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            EventKind::Error,
            "input_error",
            request_id,
            user_id,
            json!({ "message": message.into() }),
        )
    }

    /// Render into the normalized JSON wire shape sinks write out.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        json!({
            "topic": self.topic(),
            "kind": self.kind,
            "label": self.label,
            "request_id": self.request_id,
            "user_id": self.user_id,
            "payload": self.payload,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for OutboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.topic(), self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_topics_are_phase_scoped() {
        let event = OutboundEvent::campaign_completed("r1", "u7", "c1");
        assert_eq!(event.topic(), "user:u7:campaign_completed");

        let ideas: Vec<crate::state::StoryIdea> = Vec::new();
        let event = OutboundEvent::story_selection_ready("r1", "u7", &ideas);
        assert_eq!(event.topic(), "user:u7:story_selection_ready");

        let event = OutboundEvent::deletion_completed("r1", "u7", "c1", 0, &[]);
        assert_eq!(event.topic(), "user:u7:deletion_completed");
    }

    #[test]
    fn unattributable_errors_route_to_system() {
        let event = OutboundEvent::input_error(None, None, "not json");
        assert_eq!(event.topic(), "system:error");
    }

    #[test]
    fn json_shape_is_stable() {
        let event = OutboundEvent::campaign_failed("r1", "u1", "boom");
        let value = event.to_json_value();
        assert_eq!(value["kind"], "notification");
        assert_eq!(value["label"], "campaign_failed");
        assert_eq!(value["payload"]["message"], "boom");
    }
}
