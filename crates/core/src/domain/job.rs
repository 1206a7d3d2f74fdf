use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::utterance::{ActorId, ContextId};

/// Escalating recheck delays, in seconds. The step index saturates at the
/// last entry rather than growing unbounded.
pub const BACKOFF_STEPS: [u64; 7] = [10, 30, 60, 120, 240, 480, 600];

/// Seconds until the next admission recheck for a job at `step`.
pub fn backoff_seconds(step: usize) -> u64 {
    BACKOFF_STEPS[step.min(BACKOFF_STEPS.len() - 1)]
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiJobState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl AiJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AiJobState::Done | AiJobState::Failed | AiJobState::Cancelled)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobTransitionError {
    #[error("invalid job transition from {from:?} to {to:?}")]
    Invalid { from: AiJobState, to: AiJobState },
}

/// A deferred AI completion request.
///
/// State transitions are monotonic: Queued → Running → Done/Failed, or
/// Queued → Cancelled at any pre-Running point. No transition reverses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiJob {
    pub id: JobId,
    pub actor: ActorId,
    pub context: ContextId,
    pub model: String,
    pub payload: String,
    pub priority: JobPriority,
    pub state: AiJobState,
    pub backoff_step: usize,
    pub enqueued_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    /// Set when a running job is cancelled best-effort: the in-flight call
    /// finishes but its result is never surfaced to the actor.
    pub discard_result: bool,
}

impl AiJob {
    pub fn enqueue(
        actor: ActorId,
        context: ContextId,
        model: impl Into<String>,
        payload: impl Into<String>,
        priority: JobPriority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::generate(),
            actor,
            context,
            model: model.into(),
            payload: payload.into(),
            priority,
            state: AiJobState::Queued,
            backoff_step: 0,
            enqueued_at: now,
            next_attempt_at: now + chrono::Duration::seconds(backoff_seconds(0) as i64),
            discard_result: false,
        }
    }

    fn transition(&mut self, to: AiJobState) -> Result<(), JobTransitionError> {
        let allowed = matches!(
            (self.state, to),
            (AiJobState::Queued, AiJobState::Running)
                | (AiJobState::Queued, AiJobState::Cancelled)
                | (AiJobState::Running, AiJobState::Done)
                | (AiJobState::Running, AiJobState::Failed)
        );
        if !allowed {
            return Err(JobTransitionError::Invalid { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), JobTransitionError> {
        self.transition(AiJobState::Running)
    }

    pub fn complete(&mut self) -> Result<(), JobTransitionError> {
        self.transition(AiJobState::Done)
    }

    pub fn fail(&mut self) -> Result<(), JobTransitionError> {
        self.transition(AiJobState::Failed)
    }

    pub fn cancel(&mut self) -> Result<(), JobTransitionError> {
        self.transition(AiJobState::Cancelled)
    }

    /// Advance the backoff step after a blocked recheck and schedule the
    /// next attempt. Step index is non-decreasing while blocked.
    pub fn reschedule(&mut self, now: DateTime<Utc>) {
        self.backoff_step = (self.backoff_step + 1).min(BACKOFF_STEPS.len() - 1);
        self.next_attempt_at =
            now + chrono::Duration::seconds(backoff_seconds(self.backoff_step) as i64);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == AiJobState::Queued && now >= self.next_attempt_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{backoff_seconds, AiJob, AiJobState, JobPriority, BACKOFF_STEPS};
    use crate::domain::utterance::{ActorId, ContextId};

    fn job() -> AiJob {
        AiJob::enqueue(
            ActorId("u1".into()),
            ContextId("c1".into()),
            "standard",
            "hello",
            JobPriority::Normal,
            Utc::now(),
        )
    }

    #[test]
    fn queued_job_starts_and_completes() {
        let mut j = job();
        assert_eq!(j.state, AiJobState::Queued);
        j.start().unwrap();
        assert_eq!(j.state, AiJobState::Running);
        j.complete().unwrap();
        assert_eq!(j.state, AiJobState::Done);
    }

    #[test]
    fn transitions_never_reverse() {
        let mut j = job();
        j.start().unwrap();
        assert!(j.cancel().is_err());
        j.complete().unwrap();
        assert!(j.start().is_err());
        assert!(j.fail().is_err());
        assert_eq!(j.state, AiJobState::Done);
    }

    #[test]
    fn cancel_only_before_running() {
        let mut j = job();
        j.cancel().unwrap();
        assert_eq!(j.state, AiJobState::Cancelled);
        assert!(j.start().is_err());
    }

    #[test]
    fn backoff_advances_and_saturates() {
        let mut j = job();
        let mut last = j.backoff_step;
        for _ in 0..12 {
            j.reschedule(Utc::now());
            assert!(j.backoff_step >= last);
            last = j.backoff_step;
        }
        assert_eq!(j.backoff_step, BACKOFF_STEPS.len() - 1);
        assert_eq!(backoff_seconds(j.backoff_step), 600);
    }

    #[test]
    fn first_recheck_is_ten_seconds_out() {
        let j = job();
        assert_eq!(j.backoff_step, 0);
        assert_eq!((j.next_attempt_at - j.enqueued_at).num_seconds(), 10);
    }
}
