use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport-agnostic identifier for the person speaking.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for the channel or conversation the utterance arrived in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(pub String);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound message. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub actor: ActorId,
    pub context: ContextId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(
        actor: impl Into<String>,
        context: impl Into<String>,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor: ActorId(actor.into()),
            context: ContextId(context.into()),
            text: text.into(),
            received_at,
        }
    }
}
