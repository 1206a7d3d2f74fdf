//! Fuzzy resolution of slot tokens against a directory of entities.
//!
//! Explicit references such as `<@u123>` bind directly. Everything else is
//! scored name by name: exact 1.0, prefix 0.92, substring 0.86, and an
//! edit-distance blend below that. An exact hit always resolves alone;
//! near-ties surface as an ambiguous slot for the clarification engine.

use async_trait::async_trait;

use herald_core::{Candidate, EntityId, EntityKind, EntityRecord, ResolvedSlot};

/// Supplies the referenceable entities a token may resolve to.
#[async_trait]
pub trait EntityPool: Send + Sync {
    async fn entries(&self, kind: EntityKind) -> anyhow::Result<Vec<EntityRecord>>;
}

#[derive(Clone, Copy, Debug)]
pub struct ResolverConfig {
    /// Scores below this never become candidates.
    pub min_score: f64,
    /// A lone leader at or above this score binds without asking.
    pub auto_resolve_score: f64,
    /// Lead the top candidate needs over the runner-up to bind silently.
    pub margin: f64,
    /// Maximum candidates surfaced in a selection prompt.
    pub top_k: usize,
    /// Bonus for entities the actor referenced recently.
    pub recency_bonus: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.4,
            auto_resolve_score: 0.82,
            margin: 0.15,
            top_k: 5,
            recency_bonus: 0.04,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Resolver {
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolves one raw token against the given pool entries. `recent`
    /// holds entity ids from the actor's context window; they earn a small
    /// bonus so a follow-up like "jon" prefers the Jon just talked about.
    pub fn resolve(
        &self,
        token: &str,
        entries: &[EntityRecord],
        recent: &[EntityId],
    ) -> ResolvedSlot {
        if let Some(reference) = ExplicitRef::parse(token) {
            return self.resolve_explicit(token, reference, entries);
        }

        // A token that is itself a known id binds without fuzzing.
        if let Some(entry) = entries.iter().find(|entry| entry.id.0 == token) {
            return ResolvedSlot::single(
                token,
                Candidate::exact(entry.id.clone(), entry.kind, entry.display_name.clone()),
            );
        }

        let needle = normalize(token.trim_start_matches(['@', '#']));
        if needle.is_empty() {
            return ResolvedSlot::empty(token);
        }

        let mut scored: Vec<Candidate> = Vec::new();
        for entry in entries {
            let base = entry_score(&needle, entry);
            if base < self.config.min_score {
                continue;
            }
            let mut score = base;
            if base < 1.0 && recent.contains(&entry.id) {
                score = (score + self.config.recency_bonus).min(0.98);
            }
            scored.push(Candidate {
                id: entry.id.clone(),
                kind: entry.kind,
                label: entry.display_name.clone(),
                score,
            });
        }

        // Score descending, then label for a stable prompt order.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });

        // An exact hit outranks any amount of partial overlap.
        let exact: Vec<&Candidate> = scored.iter().filter(|c| c.score >= 1.0).collect();
        match exact.len() {
            1 => return ResolvedSlot::single(token, exact[0].clone()),
            n if n > 1 => {
                let ambiguous = exact.into_iter().cloned().collect();
                return ResolvedSlot::ambiguous(token, ambiguous);
            }
            _ => {}
        }

        match scored.len() {
            0 => ResolvedSlot::empty(token),
            1 => {
                if scored[0].score >= self.config.auto_resolve_score {
                    ResolvedSlot::single(token, scored.remove(0))
                } else {
                    scored.truncate(self.config.top_k);
                    ResolvedSlot::ambiguous(token, scored)
                }
            }
            _ => {
                let lead = scored[0].score - scored[1].score;
                if scored[0].score >= self.config.auto_resolve_score && lead >= self.config.margin {
                    ResolvedSlot::single(token, scored.remove(0))
                } else {
                    scored.truncate(self.config.top_k);
                    ResolvedSlot::ambiguous(token, scored)
                }
            }
        }
    }

    fn resolve_explicit(
        &self,
        token: &str,
        reference: ExplicitRef,
        entries: &[EntityRecord],
    ) -> ResolvedSlot {
        let found = entries
            .iter()
            .find(|entry| entry.kind == reference.kind && entry.id.0 == reference.id);
        match found {
            Some(entry) => ResolvedSlot::single(
                token,
                Candidate::exact(entry.id.clone(), entry.kind, entry.display_name.clone()),
            ),
            // The reference names an id the pool does not know.
            None => ResolvedSlot::empty(token),
        }
    }
}

/// An unambiguous platform reference embedded in the utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ExplicitRef {
    kind: EntityKind,
    id: String,
}

impl ExplicitRef {
    /// Accepts `<@id>` (actor), `<#id>` (channel), and `<@&id>` (role).
    fn parse(token: &str) -> Option<Self> {
        let inner = token.strip_prefix('<')?.strip_suffix('>')?;
        let (kind, id) = if let Some(id) = inner.strip_prefix("@&") {
            (EntityKind::Role, id)
        } else if let Some(id) = inner.strip_prefix('@') {
            (EntityKind::Actor, id)
        } else if let Some(id) = inner.strip_prefix('#') {
            (EntityKind::Channel, id)
        } else {
            return None;
        };
        if id.is_empty() {
            return None;
        }
        Some(Self { kind, id: id.to_string() })
    }
}

fn entry_score(needle: &str, entry: &EntityRecord) -> f64 {
    let mut best: f64 = 0.0;
    for name in std::iter::once(&entry.display_name).chain(entry.aliases.iter()) {
        best = best.max(name_score(needle, &normalize(name)));
    }
    best
}

fn name_score(needle: &str, name: &str) -> f64 {
    if name == needle {
        1.0
    } else if name.starts_with(needle) {
        0.92
    } else if name.contains(needle) {
        0.86
    } else {
        0.6 * similarity(needle, name)
    }
}

/// Normalized edit-distance similarity in [0, 1].
fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / longest as f64
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use herald_core::{EntityId, EntityKind, EntityRecord};

    use super::{Resolver, ResolverConfig};

    fn record(id: &str, kind: EntityKind, name: &str, aliases: &[&str]) -> EntityRecord {
        EntityRecord {
            id: EntityId(id.to_string()),
            kind,
            display_name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn pool() -> Vec<EntityRecord> {
        vec![
            record("u-1", EntityKind::Actor, "Jon", &[]),
            record("u-2", EntityKind::Actor, "Jonathan", &["jonny"]),
            record("u-3", EntityKind::Actor, "Jonas", &[]),
            record("u-4", EntityKind::Actor, "Maria", &[]),
        ]
    }

    fn resolver() -> Resolver {
        Resolver::new(ResolverConfig::default())
    }

    #[test]
    fn exact_match_resolves_alone_despite_near_names() {
        let slot = resolver().resolve("jon", &pool(), &[]);
        let bound = slot.bound().expect("exact name should bind");
        assert_eq!(bound.id.0, "u-1");
        assert_eq!(bound.score, 1.0);
    }

    #[test]
    fn shared_prefix_without_exact_hit_is_ambiguous() {
        let slot = resolver().resolve("jona", &pool(), &[]);
        assert!(slot.is_ambiguous());
        let labels: Vec<&str> = slot.candidates.iter().map(|c| c.label.as_str()).collect();
        assert!(labels.contains(&"Jonathan"));
        assert!(labels.contains(&"Jonas"));
    }

    #[test]
    fn alias_counts_as_a_name() {
        let slot = resolver().resolve("jonny", &pool(), &[]);
        let bound = slot.bound().expect("alias should bind");
        assert_eq!(bound.id.0, "u-2");
    }

    #[test]
    fn unknown_token_yields_no_candidates() {
        let slot = resolver().resolve("zebra", &pool(), &[]);
        assert!(slot.is_empty());
    }

    #[test]
    fn recency_bonus_never_reaches_exact() {
        let recent = vec![EntityId("u-2".to_string())];
        let slot = resolver().resolve("jona", &pool(), &recent);
        let top = &slot.candidates[0];
        assert_eq!(top.id.0, "u-2");
        assert!(top.score < 1.0);
    }

    #[test]
    fn explicit_actor_reference_short_circuits() {
        let slot = resolver().resolve("<@u-3>", &pool(), &[]);
        let bound = slot.bound().expect("explicit ref should bind");
        assert_eq!(bound.id.0, "u-3");
        assert_eq!(bound.label, "Jonas");
    }

    #[test]
    fn explicit_reference_to_unknown_id_is_empty() {
        let slot = resolver().resolve("<@u-99>", &pool(), &[]);
        assert!(slot.is_empty());
    }

    #[test]
    fn bare_id_token_binds_without_fuzzing() {
        let slot = resolver().resolve("u-2", &pool(), &[]);
        let bound = slot.bound().expect("known id should bind");
        assert_eq!(bound.label, "Jonathan");
        assert_eq!(bound.score, 1.0);
    }

    #[test]
    fn mention_sigils_are_stripped_before_matching() {
        let slot = resolver().resolve("@maria", &pool(), &[]);
        let bound = slot.bound().expect("sigil-prefixed name should bind");
        assert_eq!(bound.id.0, "u-4");
    }

    #[test]
    fn candidate_list_is_capped_at_top_k() {
        let mut entries = pool();
        for i in 5..15 {
            entries.push(record(
                &format!("u-{i}"),
                EntityKind::Actor,
                &format!("Jonquil{i}"),
                &[],
            ));
        }
        let slot = resolver().resolve("jonq", &entries, &[]);
        assert!(slot.candidates.len() <= 5);
    }
}
