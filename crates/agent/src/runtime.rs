//! The pipeline orchestrator.
//!
//! One `Runtime` instance owns all conversational state. Each utterance
//! walks a fixed cascade: an open rate-limit offer, then an open
//! clarification, then recognition, resolution, and dispatch. Whatever
//! the recognizer cannot place above the confidence floor goes to the
//! admission-controlled AI path instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use herald_core::{
    ActorId, Candidate, ClarificationPolicy, ClarifyQuestion, ContextEntry, ContextId, EntityId,
    EntityKind, Intent, IntentKind, JobId, JobPriority, PermissionLevel, PipelineConfig,
    PipelineError, SnapshotSink, StateSnapshot, Utterance,
};

use crate::clarify::{ClarifyEngine, ClarifyOutcome};
use crate::context::ContextMemory;
use crate::executor::{ArgValue, CapabilityCall, Executor, SlotType};
use crate::llm::{AiReply, CompletionClient, CompletionRequest, ReplyIntent};
use crate::recognize::Recognizer;
use crate::render;
use crate::resolve::{EntityPool, Resolver, ResolverConfig};
use crate::scheduler::{estimate_tokens, Admission, Scheduler};

/// A reply produced outside the request/response cycle, from a deferred
/// job finishing. The transport owns delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub actor: ActorId,
    pub context: ContextId,
    pub text: String,
}

/// An admitted completion whose provider round-trip has not happened
/// yet. Callers run `fetch` while holding no runtime lock, then feed
/// the result back through `Runtime::absorb_completion`, so a slow
/// provider never stalls other actors or the maintenance tick.
pub struct PendingCompletion {
    actor: ActorId,
    context: ContextId,
    job: Option<JobId>,
    request: CompletionRequest,
    client: Arc<dyn CompletionClient>,
}

impl PendingCompletion {
    /// The provider round-trip itself.
    pub async fn fetch(&self) -> Result<String, PipelineError> {
        self.client.complete(self.request.clone()).await
    }
}

/// A rate-limit WAIT/CANCEL offer occupying the actor's dialog slot.
#[derive(Clone, Debug)]
struct PendingOffer {
    payload: String,
    context: ContextId,
    expires_at: DateTime<Utc>,
}

/// Monotonic pipeline counters. All additions, no subtractions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub utterances: u64,
    pub dispatched: u64,
    pub clarifications_opened: u64,
    pub ai_admitted: u64,
    pub ai_queued: u64,
    pub ai_rejected: u64,
}

pub struct Runtime {
    config: PipelineConfig,
    model: String,
    recognizer: Recognizer,
    resolver: Resolver,
    context: ContextMemory,
    clarify: ClarifyEngine,
    executor: Executor,
    scheduler: Scheduler,
    client: Arc<dyn CompletionClient>,
    pool: Arc<dyn EntityPool>,
    sink: Arc<dyn SnapshotSink>,
    permissions: HashMap<ActorId, PermissionLevel>,
    offers: HashMap<ActorId, PendingOffer>,
    admitted: Option<PendingCompletion>,
    counters: Counters,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        model: String,
        executor: Executor,
        scheduler: Scheduler,
        client: Arc<dyn CompletionClient>,
        pool: Arc<dyn EntityPool>,
        sink: Arc<dyn SnapshotSink>,
        permissions: HashMap<ActorId, PermissionLevel>,
    ) -> Self {
        let resolver = Resolver::new(ResolverConfig {
            min_score: config.resolve_min_score,
            auto_resolve_score: config.auto_resolve_score,
            margin: config.resolve_margin,
            top_k: config.top_k,
            ..ResolverConfig::default()
        });
        let clarify = ClarifyEngine::new(config.clarification_timeout_secs);
        let context = ContextMemory::new(config.context_capacity);
        Self {
            config,
            model,
            recognizer: Recognizer::new(),
            resolver,
            context,
            clarify,
            executor,
            scheduler,
            client,
            pool,
            sink,
            permissions,
            offers: HashMap::new(),
            admitted: None,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Processes one utterance and returns the replies for its actor,
    /// plus any admitted AI completion still waiting on its provider
    /// round-trip. Failures become user-facing text here; nothing
    /// propagates.
    pub async fn handle(
        &mut self,
        utterance: &Utterance,
        now: DateTime<Utc>,
    ) -> (Vec<String>, Option<PendingCompletion>) {
        self.counters.utterances += 1;
        let replies = match self.route(utterance, now).await {
            Ok(replies) => replies,
            Err(err) => {
                warn!(
                    event_name = "runtime.utterance.failed",
                    actor = %utterance.actor,
                    error = %err,
                );
                vec![err.user_message()]
            }
        };
        (replies, self.admitted.take())
    }

    async fn route(
        &mut self,
        utterance: &Utterance,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        let actor = &utterance.actor;
        let text = utterance.text.trim();

        // An open WAIT/CANCEL offer owns the dialog slot. Any reply
        // settles it; an unrelated reply drops it and processes fresh.
        if let Some(offer) = self.take_offer(actor, now) {
            let reply = text.to_lowercase();
            if reply == "wait" || reply == "w" {
                let id = self.scheduler.enqueue(
                    actor.clone(),
                    offer.context,
                    &self.model,
                    offer.payload,
                    JobPriority::Normal,
                    now,
                );
                self.counters.ai_queued += 1;
                return Ok(vec![format!(
                    "Queued. I'll retry it automatically and post the answer here (job {id})."
                )]);
            }
            if reply == "cancel" || reply == "c" {
                return Ok(vec!["Dropped.".to_string()]);
            }
        }

        if self.clarify.has_dialog(actor) {
            return self.settle_clarification(utterance, now).await;
        }

        self.process_fresh(utterance, now).await
    }

    async fn settle_clarification(
        &mut self,
        utterance: &Utterance,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        let actor = &utterance.actor;
        match self.clarify.answer(actor, &utterance.text, now) {
            ClarifyOutcome::Expired => {
                let mut replies = vec![PipelineError::ClarificationExpired.user_message()];
                replies.extend(self.process_fresh(utterance, now).await?);
                Ok(replies)
            }
            ClarifyOutcome::Selected { intent, bound } => {
                self.advance(actor, &utterance.context, intent, bound, false, false, now).await
            }
            ClarifyOutcome::Confirmed { intent, bound } => {
                self.execute(actor, &utterance.context, intent, bound, now).await
            }
            ClarifyOutcome::Cancelled => {
                Ok(vec![PipelineError::ClarificationCancelled.user_message()])
            }
            ClarifyOutcome::NotAnAnswer => {
                let recognized = self
                    .recognizer
                    .recognize(&utterance.text)
                    .filter(|scored| scored.confidence >= self.config.confidence_floor);
                if recognized.is_some() {
                    match self.config.clarification_policy {
                        ClarificationPolicy::Replace => {
                            self.clarify.preempt(actor);
                            debug!(event_name = "runtime.clarify.replaced", actor = %actor);
                            self.process_fresh(utterance, now).await
                        }
                        ClarificationPolicy::Keep => Ok(vec![format!(
                            "One thing at a time. {}",
                            self.reprompt(actor, now)
                        )]),
                    }
                } else {
                    Ok(vec![format!(
                        "Sorry, I didn't catch that. {}",
                        self.reprompt(actor, now)
                    )])
                }
            }
        }
    }

    fn reprompt(&mut self, actor: &ActorId, now: DateTime<Utc>) -> String {
        match self.clarify.pending(actor, now).map(|p| &p.question) {
            Some(ClarifyQuestion::Select { prompt, .. }) => prompt.clone(),
            Some(ClarifyQuestion::Confirm { summary }) => render::confirmation_prompt(summary),
            None => String::new(),
        }
    }

    async fn process_fresh(
        &mut self,
        utterance: &Utterance,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        let recognized = self
            .recognizer
            .recognize(&utterance.text)
            .filter(|scored| scored.confidence >= self.config.confidence_floor);
        match recognized {
            Some(scored) => {
                info!(
                    event_name = "runtime.intent.recognized",
                    actor = %utterance.actor,
                    capability = scored.intent.kind.capability(),
                    confidence = scored.confidence,
                );
                self.advance(
                    &utterance.actor,
                    &utterance.context,
                    scored.intent,
                    BTreeMap::new(),
                    false,
                    false,
                    now,
                )
                .await
            }
            None => self.fall_back_to_ai(utterance, now).await,
        }
    }

    /// Resolves outstanding entity slots, then confirms or executes.
    /// `deferred` marks replies arriving from the job queue; those may
    /// not claim a dialog slot the actor has since put to other use.
    #[allow(clippy::too_many_arguments)]
    async fn advance(
        &mut self,
        actor: &ActorId,
        context: &ContextId,
        intent: Intent,
        mut bound: BTreeMap<String, Candidate>,
        force_confirm: bool,
        deferred: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        if let Some(report) = self.introspect(intent.kind, now) {
            return Ok(vec![report]);
        }

        let capability = intent.kind.capability();
        let descriptor = self.executor.registry().descriptor(capability).ok_or_else(|| {
            PipelineError::HandlerFailure {
                capability: capability.to_string(),
                detail: "not registered".to_string(),
            }
        })?;

        // Check privilege before touching the directory, so a forbidden
        // actor cannot probe entity names through selection prompts.
        if self.permission_of(actor) < descriptor.permission {
            return Err(PipelineError::PermissionDenied { capability: capability.to_string() });
        }

        for slot in descriptor.slots {
            let SlotType::Entity(kind) = slot.ty else {
                continue;
            };
            if bound.contains_key(slot.name) {
                continue;
            }
            let Some(token) = intent.slot(slot.name) else {
                continue;
            };

            // "me" / "myself" is the speaker, no directory lookup needed.
            if kind == EntityKind::Actor && is_self_reference(token) {
                let entries = self.pool.entries(kind).await.map_err(|err| {
                    PipelineError::HandlerFailure {
                        capability: "directory".to_string(),
                        detail: err.to_string(),
                    }
                })?;
                let label = entries
                    .iter()
                    .find(|entry| entry.id.0 == actor.0)
                    .map(|entry| entry.display_name.clone())
                    .unwrap_or_else(|| actor.0.clone());
                bound.insert(
                    slot.name.to_string(),
                    Candidate::exact(EntityId(actor.0.clone()), kind, label),
                );
                continue;
            }

            if ContextMemory::pronoun_kind(token).is_some() {
                match self.context.last_of_kind(actor, kind) {
                    Some(candidate) => {
                        bound.insert(slot.name.to_string(), candidate);
                        continue;
                    }
                    None => {
                        return Ok(vec![format!(
                            "I don't have a recent {} to tie '{token}' to.",
                            kind.label()
                        )]);
                    }
                }
            }

            let entries = self.pool.entries(kind).await.map_err(|err| {
                PipelineError::HandlerFailure {
                    capability: "directory".to_string(),
                    detail: err.to_string(),
                }
            })?;
            let recent = self.context.recent_ids(actor);
            let resolved = self.resolver.resolve(token, &entries, &recent);

            if resolved.is_empty() {
                return Err(PipelineError::ResolutionEmpty { token: token.to_string() });
            }
            if let Some(candidate) = resolved.bound() {
                bound.insert(slot.name.to_string(), candidate.clone());
                continue;
            }

            if let Some(reply) = self.deferred_dialog_conflict(actor, capability, deferred) {
                return Ok(vec![reply]);
            }
            let prompt = render::selection_prompt(token, &resolved.candidates);
            self.clarify.ask_selection(
                actor,
                context,
                intent.clone(),
                bound,
                slot.name,
                resolved.candidates,
                prompt.clone(),
                now,
            );
            self.counters.clarifications_opened += 1;
            info!(event_name = "runtime.clarify.selection_opened", actor = %actor, capability);
            return Ok(vec![prompt]);
        }

        if descriptor.confirm || force_confirm {
            if let Some(reply) = self.deferred_dialog_conflict(actor, capability, deferred) {
                return Ok(vec![reply]);
            }
            let target = bound.get("target").or_else(|| bound.get("source"));
            let summary = render::action_summary(&intent, target);
            let prompt = render::confirmation_prompt(&summary);
            self.clarify.ask_confirmation(actor, context, intent, bound, summary, now);
            self.counters.clarifications_opened += 1;
            info!(event_name = "runtime.clarify.confirmation_opened", actor = %actor, capability);
            return Ok(vec![prompt]);
        }

        self.execute(actor, context, intent, bound, now).await
    }

    async fn execute(
        &mut self,
        actor: &ActorId,
        context: &ContextId,
        intent: Intent,
        bound: BTreeMap<String, Candidate>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        let mut args: BTreeMap<String, ArgValue> = BTreeMap::new();
        for (name, candidate) in &bound {
            args.insert(name.clone(), ArgValue::Entity(candidate.clone()));
        }
        for (name, value) in &intent.slots {
            if !args.contains_key(name) {
                args.insert(name.clone(), ArgValue::Text(value.clone()));
            }
        }

        let call = CapabilityCall { actor: actor.clone(), context: context.clone(), args };
        let reply = self.executor.dispatch(intent.kind, self.permission_of(actor), call).await?;

        self.counters.dispatched += 1;
        info!(
            event_name = "runtime.intent.dispatched",
            actor = %actor,
            capability = intent.kind.capability(),
        );
        let target = bound
            .get("target")
            .or_else(|| bound.get("source"))
            .or_else(|| bound.get("dest"))
            .cloned();
        self.context.record(
            actor,
            ContextEntry {
                intent: intent.kind,
                target,
                payload: intent.slot("payload").map(str::to_string),
                recorded_at: now,
            },
        );
        Ok(vec![reply])
    }

    /// Reports answered straight from pipeline state.
    fn introspect(&mut self, kind: IntentKind, now: DateTime<Utc>) -> Option<String> {
        match kind {
            IntentKind::ShowQueue => Some(render::queue_report(&self.scheduler.queued_jobs(), now)),
            IntentKind::ShowHealth => {
                let mut rows = Vec::new();
                for model in self.scheduler.models() {
                    let (requests, tokens, today) = self.scheduler.usage(&model, now);
                    let limits = self.scheduler.limits_for(&model);
                    rows.push((model, requests, tokens, today, limits));
                }
                let c = self.counters;
                Some(format!(
                    "{}\nHandled {} utterance(s): {} dispatched, {} clarified, {} AI direct, \
                     {} queued, {} rejected.",
                    render::health_report(&rows),
                    c.utterances,
                    c.dispatched,
                    c.clarifications_opened,
                    c.ai_admitted,
                    c.ai_queued,
                    c.ai_rejected,
                ))
            }
            IntentKind::ListCapabilities => {
                Some(render::capabilities_report(&self.executor.registry().descriptors()))
            }
            _ => None,
        }
    }

    async fn fall_back_to_ai(
        &mut self,
        utterance: &Utterance,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        let actor = &utterance.actor;
        let tokens = estimate_tokens(&utterance.text);
        match self.scheduler.try_admit(&self.model, tokens, now) {
            Admission::Admitted => {
                self.counters.ai_admitted += 1;
                self.admitted = Some(PendingCompletion {
                    actor: actor.clone(),
                    context: utterance.context.clone(),
                    job: None,
                    request: self.completion_request(&utterance.text),
                    client: self.client.clone(),
                });
                Ok(Vec::new())
            }
            Admission::BlockedMinute { retry_at } | Admission::BlockedTokens { retry_at } => {
                // The offer takes over the actor's single dialog slot.
                self.clarify.preempt(actor);
                self.offers.insert(
                    actor.clone(),
                    PendingOffer {
                        payload: utterance.text.clone(),
                        context: utterance.context.clone(),
                        expires_at: now
                            + Duration::seconds(self.config.clarification_timeout_secs as i64),
                    },
                );
                info!(event_name = "runtime.ai.offer_opened", actor = %actor, model = %self.model);
                Ok(vec![render::wait_offer(&self.model, retry_at, now)])
            }
            Admission::BlockedDaily { reset_at } => {
                self.counters.ai_rejected += 1;
                info!(event_name = "runtime.ai.daily_rejected", actor = %actor, model = %self.model);
                Ok(vec![render::daily_rejection(&self.model, reset_at)])
            }
        }
    }

    fn completion_request(&self, payload: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            system: render::system_prompt(&self.executor.registry().descriptors()),
            user: payload.to_string(),
        }
    }

    /// Applies one structured provider reply to the pipeline.
    async fn apply_reply(
        &mut self,
        raw: &str,
        actor: &ActorId,
        context: &ContextId,
        deferred: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PipelineError> {
        let reply = AiReply::parse(raw)?;
        let descriptors = self.executor.registry().descriptors();
        let allowed: Vec<&str> = descriptors.iter().map(|d| d.name).collect();
        reply.check_tools(&allowed)?;

        let mut replies = vec![reply.response.clone()];
        if reply.intent == ReplyIntent::Talk {
            return Ok(replies);
        }

        // A confirmation request covers a single action; further actions
        // in the same reply are dropped rather than stacking dialogs.
        let needs_confirm = reply.intent == ReplyIntent::NeedsConfirmation;
        let take = if needs_confirm { 1 } else { reply.actions.len() };
        for action in reply.actions.iter().take(take) {
            let Some(kind) = kind_for_capability(&action.tool) else {
                continue;
            };
            let mut intent = Intent::new(kind);
            for (name, value) in &action.args {
                intent = intent.with_slot(name.clone(), value.clone());
            }
            let more = self
                .advance(actor, context, intent, BTreeMap::new(), needs_confirm, deferred, now)
                .await?;
            replies.extend(more);
        }
        Ok(replies)
    }

    /// Folds a finished provider round-trip back into the pipeline.
    /// Returns the message to deliver, unless the job was cancelled.
    pub async fn absorb_completion(
        &mut self,
        pending: PendingCompletion,
        raw: Result<String, PipelineError>,
        now: DateTime<Utc>,
    ) -> Option<OutboundMessage> {
        let deferred = pending.job.is_some();
        let result = match raw {
            Ok(raw) => self.apply_reply(&raw, &pending.actor, &pending.context, deferred, now).await,
            Err(err) => Err(err),
        };
        if let Some(id) = &pending.job {
            if !self.scheduler.finish(id, result.is_ok()) {
                return None;
            }
        }
        let text = match result {
            Ok(replies) => replies.join("\n"),
            Err(err) => {
                warn!(
                    event_name = "runtime.ai.completion_failed",
                    actor = %pending.actor,
                    error = %err,
                );
                err.user_message()
            }
        };
        Some(OutboundMessage { actor: pending.actor, context: pending.context, text })
    }

    /// Periodic maintenance: expires stale dialogs (telling each actor
    /// their suspended request was dropped) and rechecks queued jobs.
    /// Admitted jobs come back for the caller to fetch with the runtime
    /// unlocked; the tick itself never waits on a provider.
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
    ) -> (Vec<OutboundMessage>, Vec<PendingCompletion>) {
        let mut outbound = Vec::new();
        for dropped in self.clarify.purge_expired(now) {
            debug!(event_name = "runtime.clarify.expired", actor = %dropped.actor);
            outbound.push(OutboundMessage {
                actor: dropped.actor,
                context: dropped.context,
                text: PipelineError::ClarificationExpired.user_message(),
            });
        }
        self.offers.retain(|_, offer| offer.expires_at > now);

        let mut dispatches = Vec::new();
        for job in self.scheduler.tick(now) {
            let request = self.completion_request(&job.payload);
            dispatches.push(PendingCompletion {
                actor: job.actor,
                context: job.context,
                job: Some(job.id),
                request,
                client: self.client.clone(),
            });
        }

        self.sink.record(&self.snapshot(now));
        (outbound, dispatches)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot {
            taken_at: Some(now),
            queued_jobs: self.scheduler.queued_jobs().into_iter().cloned().collect(),
            pending_clarifications: self.clarify.open_count(),
            context_actors: self.context.actor_count(),
        }
    }

    fn permission_of(&self, actor: &ActorId) -> PermissionLevel {
        self.permissions.get(actor).copied().unwrap_or_default()
    }

    /// Under the Keep policy a dialog the actor opened after queueing a
    /// job outranks the job's follow-up question; the deferred action is
    /// dropped instead of overwriting it.
    fn deferred_dialog_conflict(
        &self,
        actor: &ActorId,
        capability: &str,
        deferred: bool,
    ) -> Option<String> {
        if deferred
            && self.clarify.has_dialog(actor)
            && self.config.clarification_policy == ClarificationPolicy::Keep
        {
            debug!(event_name = "runtime.clarify.deferred_conflict", actor = %actor, capability);
            Some(format!(
                "Your queued request needed a follow-up for {capability}, but you have \
                 another question open. Ask again once that's settled."
            ))
        } else {
            None
        }
    }

    fn take_offer(&mut self, actor: &ActorId, now: DateTime<Utc>) -> Option<PendingOffer> {
        let offer = self.offers.remove(actor)?;
        if offer.expires_at <= now {
            return None;
        }
        Some(offer)
    }
}

fn is_self_reference(token: &str) -> bool {
    matches!(token.to_lowercase().as_str(), "me" | "myself")
}

fn kind_for_capability(name: &str) -> Option<IntentKind> {
    const ALL: &[IntentKind] = &[
        IntentKind::SendDm,
        IntentKind::SendMessage,
        IntentKind::CreateMirror,
        IntentKind::DisableMirror,
        IntentKind::ListMirrors,
        IntentKind::AddWatcher,
        IntentKind::RemoveWatcher,
        IntentKind::ListWatchers,
        IntentKind::ShowStats,
        IntentKind::SetStatus,
        IntentKind::ShowHealth,
        IntentKind::ShowQueue,
        IntentKind::ListCapabilities,
    ];
    ALL.iter().copied().find(|kind| kind.capability() == name)
}
