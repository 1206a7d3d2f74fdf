//! Per-actor short-term memory.
//!
//! Every completed exchange is appended to the actor's window; the oldest
//! entry falls off once the window is full. Pronoun follow-ups and the
//! resolver's recency bonus both read from here.

use std::collections::HashMap;
use std::collections::VecDeque;

use herald_core::{ActorId, Candidate, ContextEntry, EntityId, EntityKind, IntentKind};

/// Pronouns that refer back to the most recent entity of a given kind.
const ACTOR_PRONOUNS: &[&str] = &["him", "her", "them", "they"];
const CHANNEL_PRONOUNS: &[&str] = &["there", "it"];

#[derive(Debug)]
pub struct ContextMemory {
    capacity: usize,
    windows: HashMap<ActorId, VecDeque<ContextEntry>>,
}

impl ContextMemory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), windows: HashMap::new() }
    }

    pub fn record(&mut self, actor: &ActorId, entry: ContextEntry) {
        let window = self.windows.entry(actor.clone()).or_default();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(entry);
    }

    /// Entity ids this actor touched recently, newest first, deduplicated.
    pub fn recent_ids(&self, actor: &ActorId) -> Vec<EntityId> {
        let Some(window) = self.windows.get(actor) else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        for entry in window.iter().rev() {
            if let Some(target) = &entry.target {
                if !seen.contains(&target.id) {
                    seen.push(target.id.clone());
                }
            }
        }
        seen
    }

    /// The kind of action this actor last completed.
    pub fn last_intent(&self, actor: &ActorId) -> Option<IntentKind> {
        self.windows.get(actor)?.back().map(|entry| entry.intent)
    }

    /// The most recent entity of the requested kind, for pronoun binding.
    pub fn last_of_kind(&self, actor: &ActorId, kind: EntityKind) -> Option<Candidate> {
        self.windows.get(actor)?.iter().rev().find_map(|entry| {
            entry.target.as_ref().filter(|t| t.kind == kind).cloned()
        })
    }

    /// Maps a pronoun token to the kind of entity it refers back to.
    pub fn pronoun_kind(token: &str) -> Option<EntityKind> {
        let lowered = token.to_lowercase();
        if ACTOR_PRONOUNS.contains(&lowered.as_str()) {
            Some(EntityKind::Actor)
        } else if CHANNEL_PRONOUNS.contains(&lowered.as_str()) {
            Some(EntityKind::Channel)
        } else {
            None
        }
    }

    pub fn actor_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use herald_core::{ActorId, Candidate, ContextEntry, EntityId, EntityKind, IntentKind};

    use super::ContextMemory;

    fn actor() -> ActorId {
        ActorId("u-caller".to_string())
    }

    fn entry(target_id: &str, kind: EntityKind) -> ContextEntry {
        ContextEntry {
            intent: IntentKind::SendDm,
            target: Some(Candidate::exact(
                EntityId(target_id.to_string()),
                kind,
                target_id.to_string(),
            )),
            payload: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn window_drops_oldest_past_capacity() {
        let mut memory = ContextMemory::new(3);
        for i in 0..5 {
            memory.record(&actor(), entry(&format!("u-{i}"), EntityKind::Actor));
        }
        let ids = memory.recent_ids(&actor());
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0].0, "u-4");
        assert!(!ids.iter().any(|id| id.0 == "u-0"));
    }

    #[test]
    fn recent_ids_deduplicate_and_order_newest_first() {
        let mut memory = ContextMemory::new(10);
        memory.record(&actor(), entry("u-a", EntityKind::Actor));
        memory.record(&actor(), entry("u-b", EntityKind::Actor));
        memory.record(&actor(), entry("u-a", EntityKind::Actor));
        let ids = memory.recent_ids(&actor());
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].0, "u-a");
        assert_eq!(ids[1].0, "u-b");
    }

    #[test]
    fn pronouns_bind_to_the_latest_entity_of_their_kind() {
        let mut memory = ContextMemory::new(10);
        memory.record(&actor(), entry("u-jon", EntityKind::Actor));
        memory.record(&actor(), entry("c-general", EntityKind::Channel));
        let him = memory.last_of_kind(&actor(), EntityKind::Actor).unwrap();
        assert_eq!(him.id.0, "u-jon");
        let there = memory.last_of_kind(&actor(), EntityKind::Channel).unwrap();
        assert_eq!(there.id.0, "c-general");
    }

    #[test]
    fn last_intent_tracks_the_newest_entry() {
        let mut memory = ContextMemory::new(10);
        assert!(memory.last_intent(&actor()).is_none());
        memory.record(&actor(), entry("u-jon", EntityKind::Actor));
        assert_eq!(memory.last_intent(&actor()), Some(IntentKind::SendDm));
    }

    #[test]
    fn windows_are_isolated_per_actor() {
        let mut memory = ContextMemory::new(10);
        memory.record(&actor(), entry("u-jon", EntityKind::Actor));
        let other = ActorId("u-other".to_string());
        assert!(memory.recent_ids(&other).is_empty());
        assert!(memory.last_of_kind(&other, EntityKind::Actor).is_none());
    }

    #[test]
    fn pronoun_lookup_covers_both_kinds() {
        assert_eq!(ContextMemory::pronoun_kind("him"), Some(EntityKind::Actor));
        assert_eq!(ContextMemory::pronoun_kind("There"), Some(EntityKind::Channel));
        assert_eq!(ContextMemory::pronoun_kind("jon"), None);
    }
}
