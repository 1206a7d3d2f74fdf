//! Deterministic intent recognition.
//!
//! Each intent registers trigger phrases and weighted keywords. An
//! utterance is scored against every registration; the best score wins if
//! it clears the configured confidence floor. No model is consulted here.

use herald_core::{Intent, IntentKind};

/// How a matched trigger's remainder is carved into slots.
#[derive(Clone, Copy, Debug)]
enum SlotRule {
    /// No slots. Remainder text is ignored.
    None,
    /// First token is the target reference, the rest is free text.
    TargetThenPayload,
    /// Single target reference, nothing else.
    TargetOnly,
    /// Two target references joined by "to" / "into".
    SourceToDest,
    /// Everything after the trigger is free text.
    PayloadOnly,
    /// First token selects a stats scope, normalized through aliases.
    Scope,
}

struct IntentSpec {
    kind: IntentKind,
    /// Phrase forms the utterance may open with, most specific first.
    triggers: &'static [&'static str],
    /// Mid-utterance hints and their score contributions.
    keywords: &'static [(&'static str, f64)],
    slots: SlotRule,
}

/// Registration order doubles as the final tie-break, so broader intents
/// sit below the more specific ones that share their vocabulary.
const INTENT_SPECS: &[IntentSpec] = &[
    IntentSpec {
        kind: IntentKind::DisableMirror,
        triggers: &["stop mirroring", "unmirror", "disable mirror"],
        keywords: &[("stop", 0.2), ("mirroring", 0.4)],
        slots: SlotRule::TargetOnly,
    },
    IntentSpec {
        kind: IntentKind::ListMirrors,
        triggers: &["list mirrors", "show mirrors"],
        keywords: &[("mirrors", 0.5)],
        slots: SlotRule::None,
    },
    IntentSpec {
        kind: IntentKind::CreateMirror,
        triggers: &["mirror", "create mirror"],
        keywords: &[("mirror", 0.4)],
        slots: SlotRule::SourceToDest,
    },
    IntentSpec {
        kind: IntentKind::ListWatchers,
        triggers: &["list watchers", "show watchers"],
        keywords: &[("watchers", 0.5)],
        slots: SlotRule::None,
    },
    IntentSpec {
        kind: IntentKind::RemoveWatcher,
        triggers: &["unwatch", "remove watcher", "stop watching"],
        keywords: &[("unwatch", 0.6)],
        slots: SlotRule::TargetOnly,
    },
    IntentSpec {
        kind: IntentKind::AddWatcher,
        triggers: &["watch", "add watcher"],
        keywords: &[("watch", 0.4)],
        slots: SlotRule::TargetOnly,
    },
    IntentSpec {
        kind: IntentKind::SendDm,
        triggers: &["dm", "whisper", "tell", "message"],
        keywords: &[("dm", 0.5), ("privately", 0.3)],
        slots: SlotRule::TargetThenPayload,
    },
    IntentSpec {
        kind: IntentKind::SendMessage,
        triggers: &["say in", "post in", "announce in", "send to"],
        keywords: &[("announce", 0.4), ("post", 0.3)],
        slots: SlotRule::TargetThenPayload,
    },
    IntentSpec {
        kind: IntentKind::ShowStats,
        triggers: &["stats", "show stats", "usage"],
        keywords: &[("stats", 0.5), ("usage", 0.4)],
        slots: SlotRule::Scope,
    },
    IntentSpec {
        kind: IntentKind::SetStatus,
        triggers: &["set status", "status to", "set status to"],
        keywords: &[("status", 0.3)],
        slots: SlotRule::PayloadOnly,
    },
    IntentSpec {
        kind: IntentKind::ShowHealth,
        triggers: &["health", "show health", "are you ok"],
        keywords: &[("health", 0.5)],
        slots: SlotRule::None,
    },
    IntentSpec {
        kind: IntentKind::ShowQueue,
        triggers: &["queue", "show queue", "pending jobs"],
        keywords: &[("queue", 0.5), ("pending", 0.3)],
        slots: SlotRule::None,
    },
    IntentSpec {
        kind: IntentKind::ListCapabilities,
        triggers: &["help", "capabilities", "what can you do", "commands"],
        keywords: &[("help", 0.5)],
        slots: SlotRule::None,
    },
];

/// Leading courtesy words that carry no intent signal.
const POLITENESS: &[&str] = &["please", "hey", "hi", "ok", "okay", "can", "could", "would", "you"];

const SCOPE_ALIASES: &[(&str, &str)] = &[
    ("today", "today"),
    ("day", "today"),
    ("daily", "today"),
    ("week", "week"),
    ("weekly", "week"),
    ("month", "month"),
    ("monthly", "month"),
    ("year", "year"),
    ("yearly", "year"),
    ("all", "all"),
    ("alltime", "all"),
    ("total", "all"),
    ("everything", "all"),
];

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredIntent {
    pub intent: Intent,
    pub confidence: f64,
}

#[derive(Clone, Debug, Default)]
pub struct Recognizer;

impl Recognizer {
    pub fn new() -> Self {
        Self
    }

    /// Scores the utterance against every registered intent and returns
    /// the best match, if any trigger or keyword fired at all. Callers
    /// compare the confidence against their floor.
    pub fn recognize(&self, text: &str) -> Option<ScoredIntent> {
        let stripped = strip_politeness(&normalize(text));
        if stripped.is_empty() {
            return None;
        }
        let tokens = tokenize(&stripped);

        let mut best: Option<(ScoredIntent, usize)> = None;
        for spec in INTENT_SPECS {
            let Some((score, trigger_len, remainder)) = score_spec(spec, &tokens) else {
                continue;
            };
            let candidate = ScoredIntent {
                intent: extract_slots(spec, &remainder),
                confidence: score.min(0.98),
            };
            let replace = match &best {
                None => true,
                Some((current, current_len)) => {
                    candidate.confidence > current.confidence
                        || (candidate.confidence == current.confidence
                            && trigger_len > *current_len)
                }
            };
            if replace {
                best = Some((candidate, trigger_len));
            }
        }
        best.map(|(scored, _)| scored)
    }
}

/// Returns (score, matched trigger token count, remainder tokens).
fn score_spec(spec: &IntentSpec, tokens: &[String]) -> Option<(f64, usize, Vec<String>)> {
    let mut trigger_hit: Option<(usize, Vec<String>)> = None;
    for trigger in spec.triggers {
        let trigger_tokens: Vec<&str> = trigger.split_whitespace().collect();
        if tokens.len() >= trigger_tokens.len()
            && tokens
                .iter()
                .zip(&trigger_tokens)
                .all(|(token, expected)| token == expected)
        {
            let better = match &trigger_hit {
                None => true,
                Some((len, _)) => trigger_tokens.len() > *len,
            };
            if better {
                trigger_hit =
                    Some((trigger_tokens.len(), tokens[trigger_tokens.len()..].to_vec()));
            }
        }
    }

    let keyword_score: f64 = spec
        .keywords
        .iter()
        .filter(|(word, _)| tokens.iter().any(|t| t == word))
        .map(|(_, weight)| weight)
        .sum();

    match trigger_hit {
        Some((len, remainder)) => {
            // A leading trigger is decisive; keywords only nudge it.
            let score = 0.9 + 0.02 * (len as f64 - 1.0) + keyword_score.min(0.06);
            Some((score, len, remainder))
        }
        None if keyword_score > 0.0 => Some((keyword_score.min(0.8), 0, tokens.to_vec())),
        None => None,
    }
}

fn extract_slots(spec: &IntentSpec, remainder: &[String]) -> Intent {
    let mut intent = Intent::new(spec.kind);
    match spec.slots {
        SlotRule::None => {}
        SlotRule::TargetOnly => {
            if let Some(first) = remainder.first() {
                intent = intent.with_slot("target", first.clone());
            }
        }
        SlotRule::TargetThenPayload => {
            if let Some(first) = remainder.first() {
                intent = intent.with_slot("target", first.clone());
            }
            if remainder.len() > 1 {
                intent = intent.with_slot("payload", remainder[1..].join(" "));
            }
        }
        SlotRule::SourceToDest => {
            let split = remainder
                .iter()
                .position(|t| t == "to" || t == "into");
            match split {
                Some(at) if at > 0 && at + 1 < remainder.len() => {
                    intent = intent
                        .with_slot("source", remainder[..at].join(" "))
                        .with_slot("dest", remainder[at + 1..].join(" "));
                }
                _ => {
                    if let Some(first) = remainder.first() {
                        intent = intent.with_slot("source", first.clone());
                    }
                }
            }
        }
        SlotRule::PayloadOnly => {
            if !remainder.is_empty() {
                intent = intent.with_slot("payload", remainder.join(" "));
            }
        }
        SlotRule::Scope => {
            let scope = remainder
                .first()
                .and_then(|token| {
                    SCOPE_ALIASES
                        .iter()
                        .find(|(alias, _)| alias == token)
                        .map(|(_, canonical)| canonical.to_string())
                })
                .unwrap_or_else(|| "today".to_string());
            intent = intent.with_slot("scope", scope);
        }
    }
    intent
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Splits on whitespace and drops trailing punctuation, but keeps
/// explicit reference tokens like `<@u123>` intact for the resolver.
fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| {
            if raw.starts_with('<') {
                raw.to_string()
            } else {
                raw.trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ':' | ';'))
                    .to_string()
            }
        })
        .filter(|token| !token.is_empty())
        .collect()
}

fn strip_politeness(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    while let Some(first) = tokens.first() {
        let bare = first.trim_matches(',');
        if POLITENESS.contains(&bare) {
            tokens.remove(0);
        } else {
            break;
        }
    }
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use herald_core::IntentKind;

    use super::Recognizer;

    #[test]
    fn dm_with_target_and_payload() {
        let scored = Recognizer::new().recognize("dm jon the build is green").unwrap();
        assert_eq!(scored.intent.kind, IntentKind::SendDm);
        assert_eq!(scored.intent.slot("target"), Some("jon"));
        assert_eq!(scored.intent.slot("payload"), Some("the build is green"));
        assert!(scored.confidence >= 0.45);
    }

    #[test]
    fn longer_trigger_beats_shared_prefix() {
        let scored = Recognizer::new().recognize("stop mirroring general").unwrap();
        assert_eq!(scored.intent.kind, IntentKind::DisableMirror);
        assert_eq!(scored.intent.slot("target"), Some("general"));
    }

    #[test]
    fn mirror_splits_source_and_dest() {
        let scored = Recognizer::new().recognize("mirror general to announcements").unwrap();
        assert_eq!(scored.intent.kind, IntentKind::CreateMirror);
        assert_eq!(scored.intent.slot("source"), Some("general"));
        assert_eq!(scored.intent.slot("dest"), Some("announcements"));
    }

    #[test]
    fn politeness_prefix_is_ignored() {
        let scored = Recognizer::new().recognize("hey, please dm maria hello").unwrap();
        assert_eq!(scored.intent.kind, IntentKind::SendDm);
        assert_eq!(scored.intent.slot("target"), Some("maria"));
    }

    #[test]
    fn stats_scope_aliases_normalize() {
        let recognizer = Recognizer::new();
        let weekly = recognizer.recognize("stats weekly").unwrap();
        assert_eq!(weekly.intent.slot("scope"), Some("week"));
        let bare = recognizer.recognize("stats").unwrap();
        assert_eq!(bare.intent.slot("scope"), Some("today"));
    }

    #[test]
    fn chatter_scores_below_the_floor() {
        let result = Recognizer::new().recognize("what a lovely morning we are having");
        match result {
            None => {}
            Some(scored) => assert!(scored.confidence < 0.45),
        }
    }

    #[test]
    fn keyword_only_match_stays_moderate() {
        let scored = Recognizer::new().recognize("someone should check the queue maybe").unwrap();
        assert_eq!(scored.intent.kind, IntentKind::ShowQueue);
        assert!(scored.confidence <= 0.8);
    }

    #[test]
    fn explicit_reference_token_survives_tokenization() {
        let scored = Recognizer::new().recognize("dm <@u123> ship it").unwrap();
        assert_eq!(scored.intent.slot("target"), Some("<@u123>"));
    }
}
