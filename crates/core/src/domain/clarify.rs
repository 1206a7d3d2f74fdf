use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::Candidate;
use crate::domain::intent::Intent;
use crate::domain::utterance::{ActorId, ContextId};

/// Where an actor's clarification dialog currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClarifyState {
    Idle,
    AwaitingSelection,
    AwaitingConfirmation,
}

/// The outstanding question attached to a suspended intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClarifyQuestion {
    /// Pick one of the enumerated candidates for `slot`.
    Select { slot: String, candidates: Vec<Candidate>, prompt: String },
    /// Explicit yes/no before a sensitive action runs.
    Confirm { summary: String },
}

impl ClarifyQuestion {
    pub fn state(&self) -> ClarifyState {
        match self {
            ClarifyQuestion::Select { .. } => ClarifyState::AwaitingSelection,
            ClarifyQuestion::Confirm { .. } => ClarifyState::AwaitingConfirmation,
        }
    }
}

/// A suspended intent waiting on an answer from its actor.
///
/// Invariant: at most one open clarification exists per actor at any time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingClarification {
    pub actor: ActorId,
    /// Where the question was asked; expiry notices go back there.
    pub context: ContextId,
    pub intent: Intent,
    /// Slots already bound before the dialog opened.
    pub bound: BTreeMap<String, Candidate>,
    pub question: ClarifyQuestion,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingClarification {
    pub fn state(&self) -> ClarifyState {
        self.question.state()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
