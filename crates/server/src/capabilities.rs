//! Built-in capability handlers.
//!
//! These implementations keep their side effects in shared in-process
//! state: an outbox of messages, a mirror table, a watcher list, and a
//! presence status. A deployment wired to a real chat platform replaces
//! the outbox writes with API calls and keeps the rest.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::info;

use herald_agent::executor::{
    ArgValue, CapabilityCall, CapabilityDescriptor, CapabilityHandler, CapabilityRegistry,
    CostTier, RegistryError, SlotSpec, SlotType,
};
use herald_core::{EntityId, EntityKind, PermissionLevel, PipelineError};

/// One delivered message, kept for the stats report.
#[derive(Clone, Debug)]
pub struct OutboxEntry {
    pub to: EntityId,
    pub label: String,
    pub payload: String,
    pub sent_at: DateTime<Utc>,
}

/// State shared by every handler. Interior mutability because handlers
/// are dispatched behind `Arc`.
#[derive(Default)]
pub struct ChatState {
    outbox: Mutex<Vec<OutboxEntry>>,
    /// source channel id -> (source label, dest id, dest label)
    mirrors: Mutex<BTreeMap<String, (String, EntityId, String)>>,
    /// watched actor id -> label
    watchers: Mutex<BTreeMap<String, String>>,
    status: Mutex<Option<String>>,
}

impl ChatState {
    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().map(|o| o.len()).unwrap_or(0)
    }

    fn push_outbox(&self, entry: OutboxEntry) {
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(entry);
        }
    }

    fn sent_since(&self, cutoff: Option<DateTime<Utc>>) -> usize {
        self.outbox
            .lock()
            .map(|outbox| {
                outbox
                    .iter()
                    .filter(|entry| cutoff.map_or(true, |at| entry.sent_at >= at))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(chrono::NaiveTime::MIN))
}

fn target_parts(call: &CapabilityCall, slot: &str) -> Result<(EntityId, String), PipelineError> {
    call.arg(slot)
        .and_then(ArgValue::entity)
        .map(|candidate| (candidate.id.clone(), candidate.label.clone()))
        .ok_or_else(|| PipelineError::MissingSlot {
            capability: "unknown".to_string(),
            slot: slot.to_string(),
        })
}

fn text_arg(call: &CapabilityCall, slot: &str) -> String {
    call.arg(slot).and_then(ArgValue::text).unwrap_or_default().to_string()
}

pub struct SendDm(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for SendDm {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "send_dm",
            summary: "Send a private message to a user",
            slots: &[
                SlotSpec { name: "target", ty: SlotType::Entity(EntityKind::Actor), required: true },
                SlotSpec { name: "payload", ty: SlotType::Text, required: true },
            ],
            permission: PermissionLevel::Standard,
            confirm: false,
            cost: CostTier::Cheap,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let (id, label) = target_parts(&call, "target")?;
        let payload = text_arg(&call, "payload");
        info!(event_name = "capability.send_dm", to = %id, from = %call.actor);
        self.0.push_outbox(OutboxEntry {
            to: id,
            label: label.clone(),
            payload: payload.clone(),
            sent_at: Utc::now(),
        });
        Ok(format!("Sent a DM to {label}: \"{payload}\""))
    }
}

pub struct SendMessage(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for SendMessage {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "send_message",
            summary: "Post a message in a channel",
            slots: &[
                SlotSpec {
                    name: "target",
                    ty: SlotType::Entity(EntityKind::Channel),
                    required: true,
                },
                SlotSpec { name: "payload", ty: SlotType::Text, required: true },
            ],
            permission: PermissionLevel::Standard,
            confirm: false,
            cost: CostTier::Cheap,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let (id, label) = target_parts(&call, "target")?;
        let payload = text_arg(&call, "payload");
        info!(event_name = "capability.send_message", channel = %id, from = %call.actor);
        self.0.push_outbox(OutboxEntry {
            to: id,
            label: label.clone(),
            payload: payload.clone(),
            sent_at: Utc::now(),
        });
        Ok(format!("Posted in {label}: \"{payload}\""))
    }
}

pub struct CreateMirror(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for CreateMirror {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "create_mirror",
            summary: "Mirror one channel's messages into another",
            slots: &[
                SlotSpec {
                    name: "source",
                    ty: SlotType::Entity(EntityKind::Channel),
                    required: true,
                },
                SlotSpec { name: "dest", ty: SlotType::Entity(EntityKind::Channel), required: true },
            ],
            permission: PermissionLevel::Elevated,
            confirm: true,
            cost: CostTier::Cheap,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let (source_id, source_label) = target_parts(&call, "source")?;
        let (dest_id, dest_label) = target_parts(&call, "dest")?;
        if source_id == dest_id {
            return Err(PipelineError::HandlerFailure {
                capability: "create_mirror".to_string(),
                detail: "source and destination are the same channel".to_string(),
            });
        }
        let mut mirrors = self.0.mirrors.lock().map_err(poisoned("create_mirror"))?;
        mirrors.insert(source_id.0.clone(), (source_label.clone(), dest_id, dest_label.clone()));
        info!(event_name = "capability.mirror_created", source = %source_id);
        Ok(format!("Mirroring {source_label} into {dest_label}."))
    }
}

pub struct DisableMirror(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for DisableMirror {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "disable_mirror",
            summary: "Stop mirroring a channel",
            slots: &[SlotSpec {
                name: "target",
                ty: SlotType::Entity(EntityKind::Channel),
                required: true,
            }],
            permission: PermissionLevel::Elevated,
            confirm: true,
            cost: CostTier::Cheap,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let (source_id, source_label) = target_parts(&call, "target")?;
        let mut mirrors = self.0.mirrors.lock().map_err(poisoned("disable_mirror"))?;
        match mirrors.remove(&source_id.0) {
            Some((_, _, dest_label)) => {
                info!(event_name = "capability.mirror_disabled", source = %source_id);
                Ok(format!("Stopped mirroring {source_label} into {dest_label}."))
            }
            None => Ok(format!("{source_label} was not being mirrored.")),
        }
    }
}

pub struct ListMirrors(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for ListMirrors {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "list_mirrors",
            summary: "List active channel mirrors",
            slots: &[],
            permission: PermissionLevel::Standard,
            confirm: false,
            cost: CostTier::Free,
        }
    }

    async fn execute(&self, _call: CapabilityCall) -> Result<String, PipelineError> {
        let mirrors = self.0.mirrors.lock().map_err(poisoned("list_mirrors"))?;
        if mirrors.is_empty() {
            return Ok("No active mirrors.".to_string());
        }
        let lines: Vec<String> = mirrors
            .values()
            .map(|(source, _, dest)| format!("  {source} -> {dest}"))
            .collect();
        Ok(format!("Active mirrors:\n{}", lines.join("\n")))
    }
}

pub struct AddWatcher(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for AddWatcher {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "add_watcher",
            summary: "Get notified when a user becomes active",
            slots: &[SlotSpec {
                name: "target",
                ty: SlotType::Entity(EntityKind::Actor),
                required: true,
            }],
            permission: PermissionLevel::Standard,
            confirm: false,
            cost: CostTier::Cheap,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let (id, label) = target_parts(&call, "target")?;
        let mut watchers = self.0.watchers.lock().map_err(poisoned("add_watcher"))?;
        if watchers.insert(id.0.clone(), label.clone()).is_some() {
            Ok(format!("Already watching {label}."))
        } else {
            info!(event_name = "capability.watcher_added", target = %id);
            Ok(format!("Watching {label}."))
        }
    }
}

pub struct RemoveWatcher(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for RemoveWatcher {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "remove_watcher",
            summary: "Stop watching a user",
            slots: &[SlotSpec {
                name: "target",
                ty: SlotType::Entity(EntityKind::Actor),
                required: true,
            }],
            permission: PermissionLevel::Standard,
            confirm: false,
            cost: CostTier::Cheap,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let (id, label) = target_parts(&call, "target")?;
        let mut watchers = self.0.watchers.lock().map_err(poisoned("remove_watcher"))?;
        match watchers.remove(&id.0) {
            Some(_) => Ok(format!("No longer watching {label}.")),
            None => Ok(format!("{label} was not being watched.")),
        }
    }
}

pub struct ListWatchers(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for ListWatchers {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "list_watchers",
            summary: "List watched users",
            slots: &[],
            permission: PermissionLevel::Standard,
            confirm: false,
            cost: CostTier::Free,
        }
    }

    async fn execute(&self, _call: CapabilityCall) -> Result<String, PipelineError> {
        let watchers = self.0.watchers.lock().map_err(poisoned("list_watchers"))?;
        if watchers.is_empty() {
            return Ok("Not watching anyone.".to_string());
        }
        let names: Vec<&str> = watchers.values().map(String::as_str).collect();
        Ok(format!("Watching: {}", names.join(", ")))
    }
}

pub struct ShowStats(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for ShowStats {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "show_stats",
            summary: "Message delivery counts by period",
            slots: &[SlotSpec {
                name: "scope",
                ty: SlotType::OneOf(&["today", "week", "month", "year", "all"]),
                required: false,
            }],
            permission: PermissionLevel::Standard,
            confirm: false,
            cost: CostTier::Free,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let scope = call.arg("scope").and_then(ArgValue::text).unwrap_or("today");
        let now = Utc::now();
        let cutoff = match scope {
            "week" => Some(now - Duration::days(7)),
            "month" => Some(now - Duration::days(30)),
            "year" => Some(now - Duration::days(365)),
            "all" => None,
            // "today" is the calendar day, not a rolling 24 hours.
            _ => Some(utc_day_start(now)),
        };
        let count = self.0.sent_since(cutoff);
        Ok(format!("{count} message(s) delivered ({scope})."))
    }
}

pub struct SetStatus(pub Arc<ChatState>);

#[async_trait]
impl CapabilityHandler for SetStatus {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "set_status",
            summary: "Change the presence status line",
            slots: &[SlotSpec { name: "payload", ty: SlotType::Text, required: true }],
            permission: PermissionLevel::Elevated,
            confirm: false,
            cost: CostTier::Cheap,
        }
    }

    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError> {
        let payload = text_arg(&call, "payload");
        let mut status = self.0.status.lock().map_err(poisoned("set_status"))?;
        *status = Some(payload.clone());
        info!(event_name = "capability.status_set");
        Ok(format!("Status set to \"{payload}\"."))
    }
}

fn poisoned<T>(capability: &'static str) -> impl FnOnce(T) -> PipelineError {
    move |_| PipelineError::HandlerFailure {
        capability: capability.to_string(),
        detail: "state lock poisoned".to_string(),
    }
}

/// Registers every built-in handler against one shared state.
pub fn register_builtins(
    registry: &mut CapabilityRegistry,
    state: Arc<ChatState>,
) -> Result<(), RegistryError> {
    registry.register(Arc::new(SendDm(state.clone())))?;
    registry.register(Arc::new(SendMessage(state.clone())))?;
    registry.register(Arc::new(CreateMirror(state.clone())))?;
    registry.register(Arc::new(DisableMirror(state.clone())))?;
    registry.register(Arc::new(ListMirrors(state.clone())))?;
    registry.register(Arc::new(AddWatcher(state.clone())))?;
    registry.register(Arc::new(RemoveWatcher(state.clone())))?;
    registry.register(Arc::new(ListWatchers(state.clone())))?;
    registry.register(Arc::new(ShowStats(state.clone())))?;
    registry.register(Arc::new(SetStatus(state)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use herald_agent::executor::{ArgValue, CapabilityCall, CapabilityHandler, CapabilityRegistry};
    use herald_core::{ActorId, Candidate, ContextId, EntityId, EntityKind};

    use chrono::{Duration, TimeZone, Utc};

    use super::{
        register_builtins, utc_day_start, AddWatcher, ChatState, CreateMirror, DisableMirror,
        ListMirrors, ListWatchers, OutboxEntry, RemoveWatcher, SendDm, ShowStats,
    };

    fn entity(id: &str, kind: EntityKind, label: &str) -> ArgValue {
        ArgValue::Entity(Candidate::exact(EntityId(id.to_string()), kind, label))
    }

    fn call(args: &[(&str, ArgValue)]) -> CapabilityCall {
        CapabilityCall {
            actor: ActorId("u-caller".to_string()),
            context: ContextId("c-room".to_string()),
            args: args
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn dm_lands_in_the_outbox() {
        let state = Arc::new(ChatState::default());
        let reply = SendDm(state.clone())
            .execute(call(&[
                ("target", entity("u-1", EntityKind::Actor, "Jon")),
                ("payload", ArgValue::Text("hello".to_string())),
            ]))
            .await
            .unwrap();
        assert!(reply.contains("Jon"));
        assert_eq!(state.outbox_len(), 1);
    }

    #[tokio::test]
    async fn mirror_lifecycle_create_list_disable() {
        let state = Arc::new(ChatState::default());
        let source = ("source", entity("c-1", EntityKind::Channel, "general"));
        let dest = ("dest", entity("c-2", EntityKind::Channel, "announcements"));

        CreateMirror(state.clone())
            .execute(call(&[source.clone(), dest]))
            .await
            .unwrap();
        let listing = ListMirrors(state.clone()).execute(call(&[])).await.unwrap();
        assert!(listing.contains("general -> announcements"));

        let off = DisableMirror(state.clone())
            .execute(call(&[("target", entity("c-1", EntityKind::Channel, "general"))]))
            .await
            .unwrap();
        assert!(off.contains("Stopped"));
        let empty = ListMirrors(state).execute(call(&[])).await.unwrap();
        assert_eq!(empty, "No active mirrors.");
    }

    #[tokio::test]
    async fn self_mirror_is_refused() {
        let state = Arc::new(ChatState::default());
        let result = CreateMirror(state)
            .execute(call(&[
                ("source", entity("c-1", EntityKind::Channel, "general")),
                ("dest", entity("c-1", EntityKind::Channel, "general")),
            ]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn watcher_lifecycle_is_idempotent() {
        let state = Arc::new(ChatState::default());
        let jon = ("target", entity("u-1", EntityKind::Actor, "Jon"));
        let first = AddWatcher(state.clone()).execute(call(&[jon.clone()])).await.unwrap();
        assert_eq!(first, "Watching Jon.");
        let second = AddWatcher(state.clone()).execute(call(&[jon.clone()])).await.unwrap();
        assert!(second.contains("Already"));

        let listing = ListWatchers(state.clone()).execute(call(&[])).await.unwrap();
        assert!(listing.contains("Jon"));
        RemoveWatcher(state.clone()).execute(call(&[jon])).await.unwrap();
        let empty = ListWatchers(state).execute(call(&[])).await.unwrap();
        assert_eq!(empty, "Not watching anyone.");
    }

    #[tokio::test]
    async fn stats_today_is_calendar_anchored() {
        let state = Arc::new(ChatState::default());
        let day_start = utc_day_start(Utc::now());
        let entry = |sent_at| OutboxEntry {
            to: EntityId("u-1".to_string()),
            label: "Jon".to_string(),
            payload: "hello".to_string(),
            sent_at,
        };
        // Late yesterday sits inside a rolling 24 hours but not today.
        state.push_outbox(entry(day_start - Duration::seconds(1)));
        state.push_outbox(entry(day_start + Duration::seconds(1)));

        let reply = ShowStats(state)
            .execute(call(&[("scope", ArgValue::Text("today".to_string()))]))
            .await
            .unwrap();
        assert_eq!(reply, "1 message(s) delivered (today).");
    }

    #[test]
    fn day_start_truncates_to_utc_midnight() {
        let noon = Utc.with_ymd_and_hms(2026, 3, 14, 12, 30, 9).unwrap();
        assert_eq!(utc_day_start(noon), Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap());
    }

    #[test]
    fn builtins_cover_every_dispatched_intent() {
        let mut registry = CapabilityRegistry::new();
        register_builtins(&mut registry, Arc::new(ChatState::default())).unwrap();
        assert!(registry.ensure_complete().is_ok());
    }
}
