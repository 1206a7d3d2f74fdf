//! Reply text rendering.
//!
//! Everything an actor reads comes from here, so wording and numbering
//! stay consistent across the pipeline. Selection prompts count from 1.

use chrono::{DateTime, Utc};

use herald_core::{AiJob, Candidate, Intent, ModelLimits};

use crate::executor::CapabilityDescriptor;

/// `7410` seconds renders as `2h3m30s`; zero leading units are dropped.
pub fn format_wait(total_seconds: i64) -> String {
    let seconds = total_seconds.max(0);
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn selection_prompt(token: &str, candidates: &[Candidate]) -> String {
    let mut lines = vec![format!("I found {} matches for '{token}':", candidates.len())];
    for (index, candidate) in candidates.iter().enumerate() {
        lines.push(format!("  {}. {} ({})", index + 1, candidate.label, candidate.kind.label()));
    }
    lines.push("Reply with a number, a name, or 'cancel'.".to_string());
    lines.join("\n")
}

pub fn confirmation_prompt(summary: &str) -> String {
    format!("{summary}\nReply 'yes' to proceed or 'no' to drop it.")
}

/// One-line description of an action about to run, for confirm dialogs.
pub fn action_summary(intent: &Intent, target: Option<&Candidate>) -> String {
    let mut summary = intent.kind.label().to_string();
    if let Some(target) = target {
        summary.push_str(&format!(" -> {}", target.label));
    }
    if let Some(payload) = intent.slot("payload") {
        summary.push_str(&format!(": \"{payload}\""));
    }
    summary
}

pub fn wait_offer(model: &str, retry_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let wait = format_wait((retry_at - now).num_seconds());
    format!(
        "The '{model}' model is rate limited right now (about {wait} until the window opens). \
         Reply 'wait' to queue this request or 'cancel' to drop it."
    )
}

pub fn daily_rejection(model: &str, reset_at: DateTime<Utc>) -> String {
    format!(
        "The '{model}' model has used its daily quota. Requests resume at {}.",
        reset_at.format("%Y-%m-%d %H:%M UTC")
    )
}

pub fn queue_report(jobs: &[&AiJob], now: DateTime<Utc>) -> String {
    if jobs.is_empty() {
        return "The AI queue is empty.".to_string();
    }
    let mut lines = vec![format!("{} queued request(s):", jobs.len())];
    for job in jobs {
        let eta = format_wait((job.next_attempt_at - now).num_seconds());
        lines.push(format!(
            "  [{:?}] {} from {} (next try in {eta}, step {})",
            job.priority,
            job.id,
            job.actor,
            job.backoff_step
        ));
    }
    lines.join("\n")
}

pub fn health_report(rows: &[(String, u32, u32, u32, ModelLimits)]) -> String {
    if rows.is_empty() {
        return "No models configured; all requests pass unmetered.".to_string();
    }
    let mut lines = vec!["Model usage this window:".to_string()];
    for (model, requests, tokens, today, limits) in rows {
        lines.push(format!(
            "  {model}: {requests}/{} req/min, {tokens}/{} tok/min, {today}/{} today",
            show_limit(limits.rpm),
            show_limit(limits.tpm),
            show_limit(limits.rpd),
        ));
    }
    lines.join("\n")
}

fn show_limit(ceiling: u32) -> String {
    if ceiling == 0 {
        "unlimited".to_string()
    } else {
        ceiling.to_string()
    }
}

pub fn capabilities_report(descriptors: &[CapabilityDescriptor]) -> String {
    let mut lines = vec!["Here is what I can do:".to_string()];
    for descriptor in descriptors {
        lines.push(format!(
            "  {} [{}] - {}",
            descriptor.name,
            descriptor.cost.label(),
            descriptor.summary
        ));
    }
    lines.join("\n")
}

/// System prompt for the fallback model. The capability list doubles as
/// the tool allow-list the reply is checked against.
pub fn system_prompt(descriptors: &[CapabilityDescriptor]) -> String {
    let mut tools = String::new();
    for descriptor in descriptors {
        tools.push_str(&format!("- {}: {}\n", descriptor.name, descriptor.summary));
    }
    format!(
        "You translate chat requests into structured replies. Respond with a single JSON \
         object: {{\"intent\": \"TALK\" | \"ACTION\" | \"NEEDS_CONFIRMATION\", \"response\": \
         \"text for the user\", \"actions\": [{{\"tool\": \"name\", \"args\": {{}}}}], \
         \"confirm\": null}}. Use ACTION only with tools from this list:\n{tools}\
         Never invent tools. Use TALK for anything conversational."
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use herald_core::{Candidate, EntityId, EntityKind, Intent, IntentKind};

    use super::{action_summary, format_wait, selection_prompt, wait_offer};

    #[test]
    fn wait_formats_compose_hours_minutes_seconds() {
        assert_eq!(format_wait(5), "5s");
        assert_eq!(format_wait(90), "1m30s");
        assert_eq!(format_wait(7410), "2h3m30s");
        assert_eq!(format_wait(-2), "0s");
    }

    #[test]
    fn selection_prompt_numbers_from_one() {
        let candidates = vec![
            Candidate::exact(EntityId("u-1".into()), EntityKind::Actor, "Jon"),
            Candidate::exact(EntityId("u-2".into()), EntityKind::Actor, "Jonathan"),
        ];
        let prompt = selection_prompt("jon", &candidates);
        assert!(prompt.contains("1. Jon"));
        assert!(prompt.contains("2. Jonathan"));
        assert!(prompt.contains("'cancel'"));
    }

    #[test]
    fn wait_offer_names_the_model_and_delay() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let offer = wait_offer("standard", now + Duration::seconds(45), now);
        assert!(offer.contains("standard"));
        assert!(offer.contains("45s"));
        assert!(offer.contains("'wait'"));
    }

    #[test]
    fn action_summary_includes_target_and_payload() {
        let intent = Intent::new(IntentKind::SendDm).with_slot("payload", "ship it");
        let target = Candidate::exact(EntityId("u-1".into()), EntityKind::Actor, "Jon");
        let summary = action_summary(&intent, Some(&target));
        assert!(summary.contains("Jon"));
        assert!(summary.contains("ship it"));
    }
}
