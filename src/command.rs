//! Inbound command envelopes and their decoding rules.
//!
//! Commands arrive as JSON queue messages. Decoding is deliberately done in
//! two stages: the raw shape is read with permissive serde structs (action as
//! a plain string, ids optional), then tightened into typed commands. That
//! keeps input failures — malformed bodies, unknown actions, missing fields —
//! reportable as error events carrying whatever `request_id`/`user_id` the
//! sender managed to include, instead of an anonymous serde error.
//!
//! Input errors never create workflow state.

use miette::Diagnostic;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::WorkflowAction;

/// Decoding and validation failures for inbound commands.
#[derive(Debug, Error, Diagnostic)]
pub enum CommandError {
    #[error("malformed command body: {source}")]
    #[diagnostic(
        code(questloom::command::malformed),
        help("The message body must be a JSON object matching the command contract.")
    )]
    Malformed {
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown workflow_action: {action}")]
    #[diagnostic(
        code(questloom::command::unknown_action),
        help("Valid actions: start, select_story, regenerate_stories, approve_core, approve_quests, approve_places, finalize.")
    )]
    UnknownAction { action: String },

    #[error("missing required field: {what}")]
    #[diagnostic(code(questloom::command::missing_field))]
    MissingField { what: &'static str },

    #[error("unknown command tag: {tag}")]
    #[diagnostic(
        code(questloom::command::unknown_tag),
        help("The command field must be \"generate\" or \"delete\".")
    )]
    UnknownTag { tag: String },

    #[error("message is neither a generation nor a deletion command")]
    #[diagnostic(
        code(questloom::command::unroutable),
        help("Generation commands carry workflow_action; deletion commands carry campaign_id.")
    )]
    Unroutable,
}

/// A generation workflow command, validated and ready for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationCommand {
    pub request_id: String,
    pub user_id: String,
    pub character_id: Option<String>,
    pub universe_id: Option<String>,
    pub universe_name: Option<String>,
    pub world_id: Option<String>,
    pub world_name: Option<String>,
    pub region_id: Option<String>,
    pub region_name: Option<String>,
    pub genre: Option<String>,
    pub user_story_idea: Option<String>,
    pub workflow_action: WorkflowAction,
    pub selected_story_id: Option<String>,
    pub user_approved_core: Option<bool>,
    pub num_quests: Option<u32>,
    pub quest_difficulty: Option<String>,
    pub quest_playtime_minutes: Option<u32>,
    pub generate_images: Option<bool>,
    /// Optional monotonic sequence; 0 means "unchecked" for senders that do
    /// not number their commands.
    pub sequence: u64,
}

/// A campaign deletion command, validated and ready for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct DeletionCommand {
    pub request_id: String,
    pub campaign_id: String,
    pub user_id: String,
    pub sequence: u64,
}

/// A routed inbound command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandEnvelope {
    Generate(GenerationCommand),
    Delete(DeletionCommand),
}

impl CommandEnvelope {
    /// The request id this command addresses.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Generate(c) => &c.request_id,
            Self::Delete(c) => &c.request_id,
        }
    }

    /// The user this command belongs to (outbound topics are per-user).
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::Generate(c) => &c.user_id,
            Self::Delete(c) => &c.user_id,
        }
    }

    /// Decode and validate a raw queue message body.
    ///
    /// Routing rule: the `"command"` tag (`"generate"` / `"delete"`) decides
    /// when present; untagged bodies route by shape — `workflow_action` means
    /// generation, `campaign_id` alone means deletion. A missing `request_id`
    /// is tolerated and replaced with a generated one so the error/progress
    /// channel always has a key to report under.
    pub fn decode(body: &[u8]) -> Result<Self, CommandError> {
        let raw: RawCommand =
            serde_json::from_slice(body).map_err(|source| CommandError::Malformed { source })?;

        let user_id = match raw.user_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(CommandError::MissingField { what: "user_id" }),
        };
        let request_id = match raw.request_id {
            Some(id) if !id.is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };

        let is_generate = match raw.command.as_deref() {
            Some("generate") => true,
            Some("delete") => false,
            Some(tag) => {
                return Err(CommandError::UnknownTag {
                    tag: tag.to_string(),
                });
            }
            None => raw.workflow_action.is_some(),
        };

        if is_generate {
            let action_str = raw.workflow_action.ok_or(CommandError::MissingField {
                what: "workflow_action",
            })?;
            let workflow_action = WorkflowAction::parse(&action_str)
                .ok_or(CommandError::UnknownAction { action: action_str })?;
            if workflow_action == WorkflowAction::SelectStory
                && raw
                    .selected_story_id
                    .as_deref()
                    .is_none_or(|s| s.is_empty())
            {
                return Err(CommandError::MissingField {
                    what: "selected_story_id",
                });
            }
            return Ok(Self::Generate(GenerationCommand {
                request_id,
                user_id,
                character_id: raw.character_id,
                universe_id: raw.universe_id,
                universe_name: raw.universe_name,
                world_id: raw.world_id,
                world_name: raw.world_name,
                region_id: raw.region_id,
                region_name: raw.region_name,
                genre: raw.genre,
                user_story_idea: raw.user_story_idea,
                workflow_action,
                selected_story_id: raw.selected_story_id,
                user_approved_core: raw.user_approved_core,
                num_quests: raw.num_quests,
                quest_difficulty: raw.quest_difficulty,
                quest_playtime_minutes: raw.quest_playtime_minutes,
                generate_images: raw.generate_images,
                sequence: raw.sequence,
            }));
        }

        match raw.campaign_id {
            Some(campaign_id) if !campaign_id.is_empty() => Ok(Self::Delete(DeletionCommand {
                request_id,
                campaign_id,
                user_id,
                sequence: raw.sequence,
            })),
            Some(_) => Err(CommandError::MissingField {
                what: "campaign_id",
            }),
            // An explicit delete tag promised a campaign id.
            None if raw.command.is_some() => Err(CommandError::MissingField {
                what: "campaign_id",
            }),
            None => Err(CommandError::Unroutable),
        }
    }
}

/// Best-effort extraction of `(request_id, user_id)` from a body that failed
/// to decode, so the error event can still be keyed to the sender.
#[must_use]
pub fn sniff_identity(body: &[u8]) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return (None, None);
    };
    let get = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    (get("request_id"), get("user_id"))
}

/// Permissive wire shape; tightened by [`CommandEnvelope::decode`].
#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    character_id: Option<String>,
    #[serde(default)]
    universe_id: Option<String>,
    #[serde(default)]
    universe_name: Option<String>,
    #[serde(default)]
    world_id: Option<String>,
    #[serde(default)]
    world_name: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default)]
    user_story_idea: Option<String>,
    #[serde(default)]
    workflow_action: Option<String>,
    #[serde(default)]
    selected_story_id: Option<String>,
    #[serde(default)]
    user_approved_core: Option<bool>,
    #[serde(default)]
    num_quests: Option<u32>,
    #[serde(default)]
    quest_difficulty: Option<String>,
    #[serde(default)]
    quest_playtime_minutes: Option<u32>,
    #[serde(default)]
    generate_images: Option<bool>,
    #[serde(default)]
    sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_generation_start() {
        let body = br#"{"request_id":"r1","user_id":"u1","workflow_action":"start","genre":"mystery"}"#;
        let envelope = CommandEnvelope::decode(body).unwrap();
        match envelope {
            CommandEnvelope::Generate(cmd) => {
                assert_eq!(cmd.request_id, "r1");
                assert_eq!(cmd.workflow_action, WorkflowAction::Start);
                assert_eq!(cmd.genre.as_deref(), Some("mystery"));
            }
            other => panic!("expected generation command, got {other:?}"),
        }
    }

    #[test]
    fn decodes_deletion_without_action() {
        let body = br#"{"request_id":"r2","user_id":"u1","campaign_id":"c9"}"#;
        let envelope = CommandEnvelope::decode(body).unwrap();
        assert!(matches!(envelope, CommandEnvelope::Delete(ref d) if d.campaign_id == "c9"));
    }

    #[test]
    fn unknown_action_is_a_hard_error() {
        let body = br#"{"request_id":"r3","user_id":"u1","workflow_action":"launch"}"#;
        let err = CommandEnvelope::decode(body).unwrap_err();
        assert!(matches!(err, CommandError::UnknownAction { ref action } if action == "launch"));
    }

    #[test]
    fn select_story_requires_selected_story_id() {
        let body = br#"{"request_id":"r4","user_id":"u1","workflow_action":"select_story"}"#;
        let err = CommandEnvelope::decode(body).unwrap_err();
        assert!(matches!(
            err,
            CommandError::MissingField {
                what: "selected_story_id"
            }
        ));
    }

    #[test]
    fn explicit_tag_overrides_shape_inference() {
        let body = br#"{"command":"delete","request_id":"r6","user_id":"u1","campaign_id":"c2","workflow_action":"start"}"#;
        let envelope = CommandEnvelope::decode(body).unwrap();
        assert!(matches!(envelope, CommandEnvelope::Delete(_)));

        let body = br#"{"command":"archive","request_id":"r7","user_id":"u1","campaign_id":"c2"}"#;
        let err = CommandEnvelope::decode(body).unwrap_err();
        assert!(matches!(err, CommandError::UnknownTag { ref tag } if tag == "archive"));
    }

    #[test]
    fn missing_request_id_gets_generated() {
        let body = br#"{"user_id":"u1","workflow_action":"start"}"#;
        let envelope = CommandEnvelope::decode(body).unwrap();
        assert!(!envelope.request_id().is_empty());
    }

    #[test]
    fn sniffs_identity_from_broken_commands() {
        let body = br#"{"request_id":"r5","user_id":"u2","workflow_action":"warp"}"#;
        let (rid, uid) = sniff_identity(body);
        assert_eq!(rid.as_deref(), Some("r5"));
        assert_eq!(uid.as_deref(), Some("u2"));
    }
}
