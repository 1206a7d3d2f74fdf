//! Admission control and the deferred-job queue for AI requests.
//!
//! Every model carries three ceilings: requests per minute window,
//! estimated tokens per minute window, and requests per UTC day. A
//! request either admits immediately, waits in the queue with escalating
//! recheck delays, or is rejected outright when the daily ceiling is hit.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::{debug, info};

use herald_core::{ActorId, AiJob, AiJobState, ContextId, JobId, JobPriority, ModelLimits};

/// Rough completion-token estimate from payload length. Deliberately
/// coarse; admission only needs an order of magnitude.
pub fn estimate_tokens(payload: &str) -> u32 {
    ((payload.len() / 4) as u32).max(1)
}

/// Verdict for one admission attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Request count hit the per-minute ceiling.
    BlockedMinute { retry_at: DateTime<Utc> },
    /// Estimated tokens would overflow the per-minute ceiling.
    BlockedTokens { retry_at: DateTime<Utc> },
    /// Daily ceiling reached. No retry before the UTC day rolls over.
    BlockedDaily { reset_at: DateTime<Utc> },
}

/// Fixed-window and daily usage counters for one model.
///
/// The minute window opens at the first recorded request and holds
/// (window start, request count, token count). Sixty seconds after the
/// start both minute counters drop to zero in one step; they never
/// decay entry by entry.
#[derive(Debug, Default)]
pub struct RateBudget {
    minute: Option<(DateTime<Utc>, u32, u32)>,
    day: Option<(i64, u32)>,
}

impl RateBudget {
    fn roll(&mut self, now: DateTime<Utc>) {
        if let Some((start, _, _)) = self.minute {
            if now - start >= Duration::seconds(60) {
                self.minute = None;
            }
        }
    }

    pub fn requests_in_window(&mut self, now: DateTime<Utc>) -> u32 {
        self.roll(now);
        self.minute.map(|(_, requests, _)| requests).unwrap_or(0)
    }

    pub fn tokens_in_window(&mut self, now: DateTime<Utc>) -> u32 {
        self.roll(now);
        self.minute.map(|(_, _, tokens)| tokens).unwrap_or(0)
    }

    pub fn requests_today(&mut self, now: DateTime<Utc>) -> u32 {
        match self.day {
            Some((ordinal, count)) if ordinal == day_ordinal(now) => count,
            _ => 0,
        }
    }

    fn record(&mut self, now: DateTime<Utc>, tokens: u32) {
        self.roll(now);
        self.minute = match self.minute {
            Some((start, requests, total)) => Some((start, requests + 1, total + tokens)),
            None => Some((now, 1, tokens)),
        };
        let ordinal = day_ordinal(now);
        self.day = match self.day {
            Some((day, count)) if day == ordinal => Some((day, count + 1)),
            _ => Some((ordinal, 1)),
        };
    }

    /// When the current window closes and every minute slot frees at once.
    fn window_retry_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.minute
            .map(|(start, _, _)| start + Duration::seconds(60))
            .unwrap_or_else(|| now + Duration::seconds(1))
    }
}

fn day_ordinal(now: DateTime<Utc>) -> i64 {
    now.num_days_from_ce() as i64
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    Utc.from_utc_datetime(&tomorrow.and_time(chrono::NaiveTime::MIN))
}

pub struct Scheduler {
    limits: BTreeMap<String, ModelLimits>,
    budgets: BTreeMap<String, RateBudget>,
    jobs: BTreeMap<JobId, AiJob>,
}

impl Scheduler {
    pub fn new(limits: BTreeMap<String, ModelLimits>) -> Self {
        Self { limits, budgets: BTreeMap::new(), jobs: BTreeMap::new() }
    }

    /// Checks the model's ceilings and, on admission, records the usage.
    /// A zero ceiling means unlimited.
    pub fn try_admit(&mut self, model: &str, tokens: u32, now: DateTime<Utc>) -> Admission {
        let limits = self.limits.get(model).copied().unwrap_or_default();
        let budget = self.budgets.entry(model.to_string()).or_default();

        if limits.rpd > 0 && budget.requests_today(now) >= limits.rpd {
            return Admission::BlockedDaily { reset_at: next_utc_midnight(now) };
        }
        if limits.rpm > 0 && budget.requests_in_window(now) >= limits.rpm {
            return Admission::BlockedMinute { retry_at: budget.window_retry_at(now) };
        }
        if limits.tpm > 0 && budget.tokens_in_window(now) + tokens > limits.tpm {
            return Admission::BlockedTokens { retry_at: budget.window_retry_at(now) };
        }

        budget.record(now, tokens);
        Admission::Admitted
    }

    /// Queues a request the actor chose to wait on. First recheck is ten
    /// seconds out at backoff step zero.
    pub fn enqueue(
        &mut self,
        actor: ActorId,
        context: ContextId,
        model: &str,
        payload: String,
        priority: JobPriority,
        now: DateTime<Utc>,
    ) -> JobId {
        let job = AiJob::enqueue(actor, context, model, payload, priority, now);
        let id = job.id.clone();
        info!(event_name = "scheduler.job.enqueued", job = %id, model, "queued for admission recheck");
        self.jobs.insert(id.clone(), job);
        id
    }

    /// Rechecks every due job. Admitted jobs come back in Running state
    /// for the caller to dispatch; blocked jobs advance their backoff.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<AiJob> {
        let mut due: Vec<(JobPriority, DateTime<Utc>, JobId)> = self
            .jobs
            .values()
            .filter(|job| job.is_due(now))
            .map(|job| (job.priority, job.enqueued_at, job.id.clone()))
            .collect();
        due.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut started = Vec::new();
        for (_, _, id) in due {
            let Some((model, tokens)) = self
                .jobs
                .get(&id)
                .map(|job| (job.model.clone(), estimate_tokens(&job.payload)))
            else {
                continue;
            };
            match self.try_admit(&model, tokens, now) {
                Admission::Admitted => {
                    if let Some(job) = self.jobs.get_mut(&id) {
                        // Admission resets the escalation for good.
                        job.backoff_step = 0;
                        if job.start().is_ok() {
                            info!(event_name = "scheduler.job.admitted", job = %id, model);
                            started.push(job.clone());
                        }
                    }
                }
                Admission::BlockedDaily { reset_at } => {
                    if let Some(job) = self.jobs.get_mut(&id) {
                        job.next_attempt_at = reset_at;
                        debug!(event_name = "scheduler.job.daily_blocked", job = %id, model);
                    }
                }
                Admission::BlockedMinute { .. } | Admission::BlockedTokens { .. } => {
                    if let Some(job) = self.jobs.get_mut(&id) {
                        job.reschedule(now);
                        debug!(
                            event_name = "scheduler.job.rescheduled",
                            job = %id,
                            model,
                            step = job.backoff_step
                        );
                    }
                }
            }
        }
        started
    }

    /// Marks a dispatched job finished and forgets it.
    /// Returns whether the result should still reach the actor.
    pub fn finish(&mut self, id: &JobId, success: bool) -> bool {
        let Some(mut job) = self.jobs.remove(id) else {
            return false;
        };
        let outcome = if success { job.complete() } else { job.fail() };
        if outcome.is_err() {
            return false;
        }
        !job.discard_result
    }

    /// Cancels a job. Queued jobs leave the queue; a running job keeps
    /// going but its result is discarded on completion.
    pub fn cancel(&mut self, id: &JobId) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        match job.state {
            AiJobState::Queued => {
                if job.cancel().is_ok() {
                    info!(event_name = "scheduler.job.cancelled", job = %id);
                    self.jobs.remove(id);
                    true
                } else {
                    false
                }
            }
            AiJobState::Running => {
                job.discard_result = true;
                info!(event_name = "scheduler.job.result_discarded", job = %id);
                true
            }
            _ => false,
        }
    }

    /// The actor's most recent queued job, for WAIT/CANCEL follow-ups.
    pub fn queued_for(&self, actor: &ActorId) -> Option<&AiJob> {
        self.jobs
            .values()
            .filter(|job| job.state == AiJobState::Queued && &job.actor == actor)
            .max_by_key(|job| job.enqueued_at)
    }

    pub fn queued_jobs(&self) -> Vec<&AiJob> {
        let mut queued: Vec<&AiJob> = self
            .jobs
            .values()
            .filter(|job| job.state == AiJobState::Queued)
            .collect();
        queued.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(a.enqueued_at.cmp(&b.enqueued_at))
        });
        queued
    }

    /// Usage counters for one model, for the health report.
    pub fn usage(&mut self, model: &str, now: DateTime<Utc>) -> (u32, u32, u32) {
        let budget = self.budgets.entry(model.to_string()).or_default();
        (
            budget.requests_in_window(now),
            budget.tokens_in_window(now),
            budget.requests_today(now),
        )
    }

    pub fn models(&self) -> Vec<String> {
        self.limits.keys().cloned().collect()
    }

    pub fn limits_for(&self, model: &str) -> ModelLimits {
        self.limits.get(model).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone, Utc};
    use herald_core::{ActorId, AiJobState, ContextId, JobPriority, ModelLimits};

    use super::{estimate_tokens, Admission, Scheduler};

    fn limits(rpm: u32, tpm: u32, rpd: u32) -> BTreeMap<String, ModelLimits> {
        let mut map = BTreeMap::new();
        map.insert("standard".to_string(), ModelLimits { rpm, tpm, rpd });
        map
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn actor() -> ActorId {
        ActorId("u-caller".to_string())
    }

    fn context() -> ContextId {
        ContextId("c-room".to_string())
    }

    #[test]
    fn admits_until_the_minute_ceiling() {
        let mut scheduler = Scheduler::new(limits(2, 0, 0));
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        assert!(matches!(
            scheduler.try_admit("standard", 10, now()),
            Admission::BlockedMinute { .. }
        ));
    }

    #[test]
    fn window_frees_after_sixty_seconds() {
        let mut scheduler = Scheduler::new(limits(1, 0, 0));
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        let later = now() + Duration::seconds(61);
        assert_eq!(scheduler.try_admit("standard", 10, later), Admission::Admitted);
        let (requests, tokens, _) = scheduler.usage("standard", later + Duration::seconds(61));
        assert_eq!((requests, tokens), (0, 0));
    }

    #[test]
    fn window_resets_wholesale_not_per_request() {
        let mut scheduler = Scheduler::new(limits(2, 0, 0));
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        let mid = now() + Duration::seconds(30);
        assert_eq!(scheduler.try_admit("standard", 10, mid), Admission::Admitted);
        assert!(matches!(
            scheduler.try_admit("standard", 10, now() + Duration::seconds(45)),
            Admission::BlockedMinute { .. }
        ));

        // Both slots free together when the window closes, including the
        // one spent halfway through it.
        let reopened = now() + Duration::seconds(61);
        assert_eq!(scheduler.try_admit("standard", 10, reopened), Admission::Admitted);
        assert_eq!(
            scheduler.try_admit("standard", 10, reopened + Duration::seconds(1)),
            Admission::Admitted
        );
    }

    #[test]
    fn retry_hint_points_at_the_window_boundary() {
        let mut scheduler = Scheduler::new(limits(1, 0, 0));
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        match scheduler.try_admit("standard", 10, now() + Duration::seconds(20)) {
            Admission::BlockedMinute { retry_at } => {
                assert_eq!(retry_at, now() + Duration::seconds(60));
            }
            other => panic!("unexpected admission: {other:?}"),
        }
    }

    #[test]
    fn token_ceiling_blocks_oversized_estimates() {
        let mut scheduler = Scheduler::new(limits(0, 100, 0));
        assert_eq!(scheduler.try_admit("standard", 80, now()), Admission::Admitted);
        assert!(matches!(
            scheduler.try_admit("standard", 30, now()),
            Admission::BlockedTokens { .. }
        ));
    }

    #[test]
    fn daily_ceiling_rejects_until_midnight() {
        let mut scheduler = Scheduler::new(limits(0, 0, 1));
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        match scheduler.try_admit("standard", 10, now() + Duration::seconds(3600)) {
            Admission::BlockedDaily { reset_at } => {
                assert_eq!(reset_at, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
            }
            other => panic!("unexpected admission: {other:?}"),
        }
    }

    #[test]
    fn daily_counter_resets_on_the_utc_day_boundary() {
        let mut scheduler = Scheduler::new(limits(0, 0, 1));
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        let tomorrow = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 1).unwrap();
        assert_eq!(scheduler.try_admit("standard", 10, tomorrow), Admission::Admitted);
    }

    #[test]
    fn unconfigured_model_is_unlimited() {
        let mut scheduler = Scheduler::new(BTreeMap::new());
        for _ in 0..50 {
            assert_eq!(scheduler.try_admit("other", 1000, now()), Admission::Admitted);
        }
    }

    #[test]
    fn queued_job_backs_off_while_blocked_and_starts_when_freed() {
        let mut scheduler = Scheduler::new(limits(1, 0, 0));
        assert_eq!(scheduler.try_admit("standard", 10, now()), Admission::Admitted);
        let id = scheduler.enqueue(
            actor(),
            context(),
            "standard",
            "summarize the incident".to_string(),
            JobPriority::Normal,
            now(),
        );

        // First recheck at +10s is still inside the blocked window.
        let blocked = scheduler.tick(now() + Duration::seconds(10));
        assert!(blocked.is_empty());
        let job = scheduler.queued_for(&actor()).unwrap();
        assert_eq!(job.backoff_step, 1);

        // Next recheck lands after the window opened.
        let started = scheduler.tick(now() + Duration::seconds(70));
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].id, id);
        assert_eq!(started[0].state, AiJobState::Running);
        assert_eq!(started[0].backoff_step, 0);
    }

    #[test]
    fn high_priority_jobs_admit_first() {
        let mut scheduler = Scheduler::new(limits(1, 0, 0));
        scheduler.enqueue(
            actor(),
            context(),
            "standard",
            "low importance".to_string(),
            JobPriority::Low,
            now(),
        );
        let high = scheduler.enqueue(
            ActorId("u-other".to_string()),
            context(),
            "standard",
            "urgent".to_string(),
            JobPriority::High,
            now(),
        );
        let started = scheduler.tick(now() + Duration::seconds(10));
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].id, high);
    }

    #[test]
    fn cancelling_a_queued_job_removes_it() {
        let mut scheduler = Scheduler::new(limits(1, 0, 0));
        let id = scheduler.enqueue(
            actor(),
            context(),
            "standard",
            "something".to_string(),
            JobPriority::Normal,
            now(),
        );
        assert!(scheduler.cancel(&id));
        assert!(scheduler.queued_for(&actor()).is_none());
        assert!(!scheduler.cancel(&id));
    }

    #[test]
    fn cancelling_a_running_job_discards_its_result() {
        let mut scheduler = Scheduler::new(limits(0, 0, 0));
        let id = scheduler.enqueue(
            actor(),
            context(),
            "standard",
            "something".to_string(),
            JobPriority::Normal,
            now(),
        );
        let started = scheduler.tick(now() + Duration::seconds(10));
        assert_eq!(started.len(), 1);
        assert!(scheduler.cancel(&id));
        assert!(!scheduler.finish(&id, true));
    }

    #[test]
    fn finished_jobs_leave_the_queue_report() {
        let mut scheduler = Scheduler::new(limits(0, 0, 0));
        let id = scheduler.enqueue(
            actor(),
            context(),
            "standard",
            "something".to_string(),
            JobPriority::Normal,
            now(),
        );
        scheduler.tick(now() + Duration::seconds(10));
        assert!(scheduler.finish(&id, true));
        assert!(scheduler.queued_jobs().is_empty());
    }

    #[test]
    fn token_estimate_scales_with_length() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
