use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::Candidate;
use crate::domain::intent::IntentKind;

/// One completed action remembered for back-reference resolution.
///
/// Entries are recorded only after an action resolved and executed, so a
/// pronoun always refers to the last completed reference, never a pending
/// or ambiguous one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub intent: IntentKind,
    pub target: Option<Candidate>,
    pub payload: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
