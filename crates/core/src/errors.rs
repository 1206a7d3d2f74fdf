use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures the pipeline converts into a user-facing message at the
/// boundary nearest their origin. None of these terminate the process.
///
/// Recognition misses and ambiguous resolutions are control flow, not
/// errors: a miss routes to the AI path and ambiguity opens a
/// clarification dialog.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("no entity matched `{token}`")]
    ResolutionEmpty { token: String },
    #[error("clarification expired")]
    ClarificationExpired,
    #[error("clarification cancelled")]
    ClarificationCancelled,
    #[error("AI provider failure: {0}")]
    Provider(String),
    #[error("per-minute request quota exhausted for `{model}`")]
    QuotaMinute { model: String, retry_at: DateTime<Utc> },
    #[error("per-minute token quota exhausted for `{model}`")]
    QuotaTokens { model: String, retry_at: DateTime<Utc> },
    #[error("daily request quota exhausted for `{model}`")]
    QuotaDaily { model: String, reset_at: DateTime<Utc> },
    #[error("capability `{capability}` is missing required slot `{slot}`")]
    MissingSlot { capability: String, slot: String },
    #[error("permission denied for `{capability}`")]
    PermissionDenied { capability: String },
    #[error("capability `{capability}` failed: {detail}")]
    HandlerFailure { capability: String, detail: String },
}

impl PipelineError {
    /// A message safe to deliver to the actor verbatim. Internal detail
    /// stays in the `Display` form for logs.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ResolutionEmpty { token } => {
                format!("Nothing matched '{token}'. Try an exact name or mention.")
            }
            PipelineError::ClarificationExpired => {
                "That question timed out, so I dropped the request.".to_string()
            }
            PipelineError::ClarificationCancelled => "Cancelled.".to_string(),
            PipelineError::Provider(_) => {
                "The AI backend returned an unusable response. Please try again.".to_string()
            }
            PipelineError::QuotaMinute { retry_at, .. }
            | PipelineError::QuotaTokens { retry_at, .. } => format!(
                "Rate limit reached. The window resets at {}.",
                retry_at.format("%H:%M:%S UTC")
            ),
            PipelineError::QuotaDaily { reset_at, .. } => format!(
                "Daily quota exhausted. Requests resume at {}.",
                reset_at.format("%Y-%m-%d %H:%M UTC")
            ),
            PipelineError::MissingSlot { slot, .. } => {
                format!("I need a {slot} for that. Try again with one included.")
            }
            PipelineError::PermissionDenied { .. } => {
                "You are not allowed to do that.".to_string()
            }
            PipelineError::HandlerFailure { capability, .. } => {
                format!("The '{capability}' action failed. Nothing was changed.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::PipelineError;

    #[test]
    fn daily_quota_message_names_reset_time() {
        let reset = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let err = PipelineError::QuotaDaily { model: "standard".into(), reset_at: reset };
        assert!(err.user_message().contains("2026-03-02 00:00 UTC"));
    }

    #[test]
    fn handler_failure_hides_detail_from_actor() {
        let err = PipelineError::HandlerFailure {
            capability: "send_dm".into(),
            detail: "socket reset by peer".into(),
        };
        assert!(!err.user_message().contains("socket"));
        assert!(err.to_string().contains("socket reset by peer"));
    }
}
