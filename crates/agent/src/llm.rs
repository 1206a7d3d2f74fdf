//! Model provider seam and the structured reply contract.
//!
//! The provider returns raw text; this module insists on a single JSON
//! object matching `AiReply`. Anything else, including an unknown intent
//! tag or a tool outside the allow-list, is a provider failure and never
//! reaches dispatch.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use herald_core::PipelineError;

#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
}

/// Pluggable completion backend. The HTTP client lives in the server
/// crate; tests use canned implementations.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, PipelineError>;
}

/// What the model claims its reply is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyIntent {
    /// Conversational text only.
    Talk,
    /// One or more tool invocations plus commentary.
    Action,
    /// The model wants an explicit yes before its actions run.
    NeedsConfirmation,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ReplyAction {
    pub tool: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AiReply {
    pub intent: ReplyIntent,
    pub response: String,
    #[serde(default)]
    pub actions: Vec<ReplyAction>,
    #[serde(default)]
    pub confirm: Option<String>,
}

impl AiReply {
    /// Parses raw model output, tolerating a Markdown code fence around
    /// the JSON object.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let stripped = strip_fence(raw.trim());
        let reply: AiReply = serde_json::from_str(stripped)
            .map_err(|err| PipelineError::Provider(format!("malformed reply: {err}")))?;
        if reply.intent == ReplyIntent::Talk && !reply.actions.is_empty() {
            return Err(PipelineError::Provider(
                "TALK reply carries actions".to_string(),
            ));
        }
        if reply.intent != ReplyIntent::Talk && reply.actions.is_empty() {
            return Err(PipelineError::Provider(
                "action reply names no actions".to_string(),
            ));
        }
        Ok(reply)
    }

    /// Rejects replies that name a tool outside the allow-list.
    pub fn check_tools(&self, allowed: &[&str]) -> Result<(), PipelineError> {
        for action in &self.actions {
            if !allowed.contains(&action.tool.as_str()) {
                return Err(PipelineError::Provider(format!(
                    "reply names unknown tool `{}`",
                    action.tool
                )));
            }
        }
        Ok(())
    }
}

fn strip_fence(raw: &str) -> &str {
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    inner.trim()
}

#[cfg(test)]
mod tests {
    use super::{AiReply, ReplyIntent};

    #[test]
    fn talk_reply_parses() {
        let reply = AiReply::parse(r#"{"intent":"TALK","response":"hello there"}"#).unwrap();
        assert_eq!(reply.intent, ReplyIntent::Talk);
        assert_eq!(reply.response, "hello there");
        assert!(reply.actions.is_empty());
    }

    #[test]
    fn fenced_action_reply_parses() {
        let raw = "```json\n{\"intent\":\"ACTION\",\"response\":\"on it\",\"actions\":[{\"tool\":\"send_dm\",\"args\":{\"target\":\"jon\",\"payload\":\"hi\"}}]}\n```";
        let reply = AiReply::parse(raw).unwrap();
        assert_eq!(reply.intent, ReplyIntent::Action);
        assert_eq!(reply.actions[0].tool, "send_dm");
        assert_eq!(reply.actions[0].args.get("target").unwrap(), "jon");
    }

    #[test]
    fn unknown_intent_tag_is_a_provider_failure() {
        let result = AiReply::parse(r#"{"intent":"DESTROY","response":"no"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn talk_with_actions_is_rejected() {
        let raw = r#"{"intent":"TALK","response":"x","actions":[{"tool":"send_dm"}]}"#;
        assert!(AiReply::parse(raw).is_err());
    }

    #[test]
    fn action_without_actions_is_rejected() {
        let raw = r#"{"intent":"ACTION","response":"x"}"#;
        assert!(AiReply::parse(raw).is_err());
    }

    #[test]
    fn tool_allow_list_is_enforced() {
        let raw = r#"{"intent":"ACTION","response":"x","actions":[{"tool":"rm_rf"}]}"#;
        let reply = AiReply::parse(raw).unwrap();
        assert!(reply.check_tools(&["send_dm", "send_message"]).is_err());
        assert!(reply.check_tools(&["rm_rf"]).is_ok());
    }

    #[test]
    fn prose_instead_of_json_is_rejected() {
        assert!(AiReply::parse("Sure, I can help with that!").is_err());
    }
}
