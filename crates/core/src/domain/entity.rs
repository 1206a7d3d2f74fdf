use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Actor,
    Channel,
    Role,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Actor => "user",
            EntityKind::Channel => "channel",
            EntityKind::Role => "role",
        }
    }
}

/// A referenceable entity as supplied by the pool provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub display_name: String,
    pub aliases: Vec<String>,
}

/// A possible resolution of a raw slot token, scored in [0, 1].
///
/// Candidates are value objects: produced fresh per resolution call and
/// never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: EntityId,
    pub kind: EntityKind,
    pub label: String,
    pub score: f64,
}

impl Candidate {
    pub fn exact(id: EntityId, kind: EntityKind, label: impl Into<String>) -> Self {
        Self { id, kind, label: label.into(), score: 1.0 }
    }
}

/// Outcome of resolving one raw token against a candidate pool.
///
/// Zero candidates means "nothing matched" (not the same as ambiguous);
/// exactly one means the slot is bound; more than one means the actor has
/// to pick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSlot {
    pub token: String,
    pub candidates: Vec<Candidate>,
}

impl ResolvedSlot {
    pub fn empty(token: impl Into<String>) -> Self {
        Self { token: token.into(), candidates: Vec::new() }
    }

    pub fn single(token: impl Into<String>, candidate: Candidate) -> Self {
        Self { token: token.into(), candidates: vec![candidate] }
    }

    pub fn ambiguous(token: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        Self { token: token.into(), candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    /// The single bound candidate, if this slot resolved cleanly.
    pub fn bound(&self) -> Option<&Candidate> {
        match self.candidates.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}
