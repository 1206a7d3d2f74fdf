//! The clarification engine.
//!
//! One open question per actor, never more. A question is either a
//! candidate selection or a yes/no confirmation, and it expires if the
//! actor walks away. Answers are parsed here; what to do with an
//! utterance that is not an answer is the runtime's call.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};

use herald_core::{
    ActorId, Candidate, ClarifyQuestion, ClarifyState, ContextId, Intent, PendingClarification,
};

/// Replies that abandon the open question outright.
const CANCEL_WORDS: &[&str] = &["cancel", "nevermind", "never mind", "forget it", "stop"];
const YES_WORDS: &[&str] = &["yes", "y", "yep", "yeah", "confirm", "do it", "go ahead"];
const NO_WORDS: &[&str] = &["no", "n", "nope", "don't", "dont"];

/// What an actor's reply to an open question turned out to be.
#[derive(Clone, Debug, PartialEq)]
pub enum ClarifyOutcome {
    /// The question expired before this reply arrived; the reply should
    /// be processed as a fresh utterance.
    Expired,
    /// A selection question was answered; the slot is now bound.
    Selected { intent: Intent, bound: BTreeMap<String, Candidate> },
    /// A confirmation question was answered with yes.
    Confirmed { intent: Intent, bound: BTreeMap<String, Candidate> },
    /// The actor backed out; the suspended intent is discarded.
    Cancelled,
    /// The reply does not parse as an answer to the open question.
    /// The question is still open; the runtime decides whether the reply
    /// is a brand-new request or noise worth a re-prompt.
    NotAnAnswer,
}

pub struct ClarifyEngine {
    timeout: Duration,
    pending: HashMap<ActorId, PendingClarification>,
}

impl ClarifyEngine {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout: Duration::seconds(timeout_secs as i64), pending: HashMap::new() }
    }

    /// Suspends `intent` behind a candidate-selection question. Replaces
    /// any question already open for this actor.
    #[allow(clippy::too_many_arguments)]
    pub fn ask_selection(
        &mut self,
        actor: &ActorId,
        context: &ContextId,
        intent: Intent,
        bound: BTreeMap<String, Candidate>,
        slot: &str,
        candidates: Vec<Candidate>,
        prompt: String,
        now: DateTime<Utc>,
    ) {
        let pending = PendingClarification {
            actor: actor.clone(),
            context: context.clone(),
            intent,
            bound,
            question: ClarifyQuestion::Select { slot: slot.to_string(), candidates, prompt },
            created_at: now,
            expires_at: now + self.timeout,
        };
        self.pending.insert(actor.clone(), pending);
    }

    /// Suspends `intent` behind a yes/no confirmation.
    pub fn ask_confirmation(
        &mut self,
        actor: &ActorId,
        context: &ContextId,
        intent: Intent,
        bound: BTreeMap<String, Candidate>,
        summary: String,
        now: DateTime<Utc>,
    ) {
        let pending = PendingClarification {
            actor: actor.clone(),
            context: context.clone(),
            intent,
            bound,
            question: ClarifyQuestion::Confirm { summary },
            created_at: now,
            expires_at: now + self.timeout,
        };
        self.pending.insert(actor.clone(), pending);
    }

    /// Whether the actor has a dialog on file, expired or not. Expiry is
    /// settled by `answer`, which reports it to the actor exactly once.
    pub fn has_dialog(&self, actor: &ActorId) -> bool {
        self.pending.contains_key(actor)
    }

    /// The actor's open question, if it has not expired. An expired
    /// question is removed on the way out.
    pub fn pending(&mut self, actor: &ActorId, now: DateTime<Utc>) -> Option<&PendingClarification> {
        if self.pending.get(actor).is_some_and(|p| p.is_expired(now)) {
            self.pending.remove(actor);
            return None;
        }
        self.pending.get(actor)
    }

    /// Interprets `text` as a reply to the actor's open question.
    /// Callers must only invoke this while a question is open.
    pub fn answer(&mut self, actor: &ActorId, text: &str, now: DateTime<Utc>) -> ClarifyOutcome {
        let Some(pending) = self.pending.get(actor) else {
            return ClarifyOutcome::NotAnAnswer;
        };
        if pending.is_expired(now) {
            self.pending.remove(actor);
            return ClarifyOutcome::Expired;
        }

        let reply = text.trim().to_lowercase();
        if CANCEL_WORDS.contains(&reply.as_str()) {
            self.pending.remove(actor);
            return ClarifyOutcome::Cancelled;
        }

        match pending.state() {
            ClarifyState::AwaitingSelection => self.answer_selection(actor, &reply),
            ClarifyState::AwaitingConfirmation => self.answer_confirmation(actor, &reply),
            ClarifyState::Idle => ClarifyOutcome::NotAnAnswer,
        }
    }

    fn answer_selection(&mut self, actor: &ActorId, reply: &str) -> ClarifyOutcome {
        let Some(pending) = self.pending.remove(actor) else {
            return ClarifyOutcome::NotAnAnswer;
        };

        let picked = match &pending.question {
            ClarifyQuestion::Select { slot, candidates, .. } => {
                // Prompts number candidates from 1.
                let chosen = if let Ok(index) = reply.parse::<usize>() {
                    if index >= 1 && index <= candidates.len() {
                        Some(candidates[index - 1].clone())
                    } else {
                        None
                    }
                } else {
                    candidates.iter().find(|c| c.label.to_lowercase() == *reply).cloned()
                };
                chosen.map(|candidate| (slot.clone(), candidate))
            }
            ClarifyQuestion::Confirm { .. } => None,
        };

        match picked {
            Some((slot, candidate)) => {
                let mut bound = pending.bound;
                bound.insert(slot, candidate);
                ClarifyOutcome::Selected { intent: pending.intent, bound }
            }
            None => {
                self.pending.insert(actor.clone(), pending);
                ClarifyOutcome::NotAnAnswer
            }
        }
    }

    fn answer_confirmation(&mut self, actor: &ActorId, reply: &str) -> ClarifyOutcome {
        if YES_WORDS.contains(&reply) {
            match self.pending.remove(actor) {
                Some(pending) => {
                    ClarifyOutcome::Confirmed { intent: pending.intent, bound: pending.bound }
                }
                None => ClarifyOutcome::NotAnAnswer,
            }
        } else if NO_WORDS.contains(&reply) {
            self.pending.remove(actor);
            ClarifyOutcome::Cancelled
        } else {
            ClarifyOutcome::NotAnAnswer
        }
    }

    /// Drops the actor's open question, if any. Used when a fresher
    /// request wins under the replacement policy, and when a rate-limit
    /// offer takes over the dialog slot.
    pub fn preempt(&mut self, actor: &ActorId) -> Option<PendingClarification> {
        self.pending.remove(actor)
    }

    /// Removes every expired question and returns the dropped dialogs,
    /// so each actor can be told their suspended request was discarded.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> Vec<PendingClarification> {
        let expired: Vec<ActorId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.is_expired(now))
            .map(|(actor, _)| actor.clone())
            .collect();
        expired.into_iter().filter_map(|actor| self.pending.remove(&actor)).collect()
    }

    pub fn open_count(&self) -> usize {
        self.pending.len()
    }
}
