//! Capability registry and dispatch.
//!
//! Every intent the recognizer can emit maps to exactly one registered
//! capability. A capability declares its slots, the privilege it demands,
//! and whether it wants a confirmation step; the registry is checked for
//! completeness at startup so a gap fails the boot, not a conversation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use herald_core::{
    ActorId, Candidate, ContextId, EntityKind, IntentKind, PermissionLevel, PipelineError,
};

/// What a capability slot accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotType {
    /// A resolved directory entity of the given kind.
    Entity(EntityKind),
    /// Free text, passed through verbatim.
    Text,
    /// One of a closed set of values.
    OneOf(&'static [&'static str]),
}

#[derive(Clone, Copy, Debug)]
pub struct SlotSpec {
    pub name: &'static str,
    pub ty: SlotType,
    pub required: bool,
}

/// Relative cost of invoking a capability, for reports and dispatch logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CostTier {
    /// Answered from local state.
    #[default]
    Free,
    /// Touches the chat platform.
    Cheap,
    /// Consumes a metered external resource.
    Expensive,
}

impl CostTier {
    pub fn label(&self) -> &'static str {
        match self {
            CostTier::Free => "free",
            CostTier::Cheap => "cheap",
            CostTier::Expensive => "expensive",
        }
    }
}

/// Static description of one capability.
#[derive(Clone, Debug)]
pub struct CapabilityDescriptor {
    pub name: &'static str,
    pub summary: &'static str,
    pub slots: &'static [SlotSpec],
    /// Minimum actor privilege.
    pub permission: PermissionLevel,
    /// Whether dispatch requires an explicit yes first.
    pub confirm: bool,
    pub cost: CostTier,
}

/// A validated argument, ready for a handler.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    Entity(Candidate),
    Text(String),
}

impl ArgValue {
    pub fn entity(&self) -> Option<&Candidate> {
        match self {
            ArgValue::Entity(candidate) => Some(candidate),
            ArgValue::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(text) => Some(text),
            ArgValue::Entity(_) => None,
        }
    }
}

/// Everything a handler gets about one invocation.
#[derive(Clone, Debug)]
pub struct CapabilityCall {
    pub actor: ActorId,
    pub context: ContextId,
    pub args: BTreeMap<String, ArgValue>,
}

impl CapabilityCall {
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name)
    }
}

/// Executes one capability. Implementations own their side effects and
/// return the reply text for the actor.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    fn descriptor(&self) -> CapabilityDescriptor;
    async fn execute(&self, call: CapabilityCall) -> Result<String, PipelineError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("capability `{0}` registered twice")]
    Duplicate(String),
    #[error("capability `{capability}` declares slot `{slot}` twice")]
    DuplicateSlot { capability: String, slot: String },
    #[error("no handler registered for capability `{0}`")]
    Unhandled(String),
}

#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) -> Result<(), RegistryError> {
        let descriptor = handler.descriptor();
        let mut names: Vec<&str> = Vec::new();
        for slot in descriptor.slots {
            if names.contains(&slot.name) {
                return Err(RegistryError::DuplicateSlot {
                    capability: descriptor.name.to_string(),
                    slot: slot.name.to_string(),
                });
            }
            names.push(slot.name);
        }
        if self.handlers.insert(descriptor.name, handler).is_some() {
            return Err(RegistryError::Duplicate(descriptor.name.to_string()));
        }
        Ok(())
    }

    /// Fails unless every dispatching intent has a handler. The queue,
    /// health, and capability reports are answered by the runtime itself
    /// and need none.
    pub fn ensure_complete(&self) -> Result<(), RegistryError> {
        const DISPATCHED_KINDS: &[IntentKind] = &[
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
        ];
        for kind in DISPATCHED_KINDS {
            if !self.handlers.contains_key(kind.capability()) {
                return Err(RegistryError::Unhandled(kind.capability().to_string()));
            }
        }
        Ok(())
    }

    pub fn descriptor(&self, capability: &str) -> Option<CapabilityDescriptor> {
        self.handlers.get(capability).map(|h| h.descriptor())
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.handlers.values().map(|h| h.descriptor()).collect()
    }

    fn handler(&self, capability: &str) -> Option<&Arc<dyn CapabilityHandler>> {
        self.handlers.get(capability)
    }
}

pub struct Executor {
    registry: CapabilityRegistry,
}

impl Executor {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Validates and dispatches one intent's capability.
    ///
    /// Permission is checked before arguments so a forbidden actor learns
    /// nothing about what the capability would have needed.
    pub async fn dispatch(
        &self,
        kind: IntentKind,
        level: PermissionLevel,
        call: CapabilityCall,
    ) -> Result<String, PipelineError> {
        let capability = kind.capability();
        let handler = self.registry.handler(capability).ok_or_else(|| {
            PipelineError::HandlerFailure {
                capability: capability.to_string(),
                detail: "not registered".to_string(),
            }
        })?;
        let descriptor = handler.descriptor();

        if level < descriptor.permission {
            return Err(PipelineError::PermissionDenied { capability: capability.to_string() });
        }

        for slot in descriptor.slots {
            match call.args.get(slot.name) {
                None if slot.required => {
                    return Err(PipelineError::MissingSlot {
                        capability: capability.to_string(),
                        slot: slot.name.to_string(),
                    });
                }
                None => {}
                Some(value) => validate_arg(capability, slot, value)?,
            }
        }

        handler.execute(call).await
    }
}

fn validate_arg(capability: &str, slot: &SlotSpec, value: &ArgValue) -> Result<(), PipelineError> {
    let ok = match (slot.ty, value) {
        (SlotType::Entity(kind), ArgValue::Entity(candidate)) => candidate.kind == kind,
        (SlotType::Text, ArgValue::Text(_)) => true,
        (SlotType::OneOf(choices), ArgValue::Text(text)) => choices.contains(&text.as_str()),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(PipelineError::MissingSlot {
            capability: capability.to_string(),
            slot: slot.name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use herald_core::{
        ActorId, Candidate, ContextId, EntityId, EntityKind, IntentKind, PermissionLevel,
        PipelineError,
    };

    use super::{
        ArgValue, CapabilityCall, CapabilityDescriptor, CapabilityHandler, CapabilityRegistry,
        CostTier, Executor, SlotSpec, SlotType,
    };

    struct SendDmStub;

    #[async_trait]
    impl CapabilityHandler for SendDmStub {
        fn descriptor(&self) -> CapabilityDescriptor {
            CapabilityDescriptor {
                name: "send_dm",
                summary: "Send a direct message",
                slots: &[
                    SlotSpec {
                        name: "target",
                        ty: SlotType::Entity(EntityKind::Actor),
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
            let target = call
                .arg("target")
                .and_then(ArgValue::entity)
                .map(|c| c.label.clone())
                .unwrap_or_default();
            Ok(format!("sent to {target}"))
        }
    }

    struct ElevatedStub;

    #[async_trait]
    impl CapabilityHandler for ElevatedStub {
        fn descriptor(&self) -> CapabilityDescriptor {
            CapabilityDescriptor {
                name: "set_status",
                summary: "Change the presence status",
                slots: &[SlotSpec { name: "payload", ty: SlotType::Text, required: true }],
                permission: PermissionLevel::Elevated,
                confirm: false,
                cost: CostTier::Free,
            }
        }

        async fn execute(&self, _call: CapabilityCall) -> Result<String, PipelineError> {
            Ok("status changed".to_string())
        }
    }

    fn call(args: BTreeMap<String, ArgValue>) -> CapabilityCall {
        CapabilityCall {
            actor: ActorId("u-caller".to_string()),
            context: ContextId("c-room".to_string()),
            args,
        }
    }

    fn executor() -> Executor {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(SendDmStub)).unwrap();
        registry.register(Arc::new(ElevatedStub)).unwrap();
        Executor::new(registry)
    }

    #[tokio::test]
    async fn valid_call_reaches_the_handler() {
        let mut args = BTreeMap::new();
        args.insert(
            "target".to_string(),
            ArgValue::Entity(Candidate::exact(
                EntityId("u-1".to_string()),
                EntityKind::Actor,
                "Jon",
            )),
        );
        args.insert("payload".to_string(), ArgValue::Text("hello".to_string()));
        let reply = executor()
            .dispatch(IntentKind::SendDm, PermissionLevel::Standard, call(args))
            .await
            .unwrap();
        assert_eq!(reply, "sent to Jon");
    }

    #[tokio::test]
    async fn missing_required_slot_is_rejected_before_the_handler() {
        let mut args = BTreeMap::new();
        args.insert("payload".to_string(), ArgValue::Text("hello".to_string()));
        let err = executor()
            .dispatch(IntentKind::SendDm, PermissionLevel::Standard, call(args))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSlot { ref slot, .. } if slot == "target"));
    }

    #[tokio::test]
    async fn wrong_entity_kind_is_rejected() {
        let mut args = BTreeMap::new();
        args.insert(
            "target".to_string(),
            ArgValue::Entity(Candidate::exact(
                EntityId("c-1".to_string()),
                EntityKind::Channel,
                "general",
            )),
        );
        args.insert("payload".to_string(), ArgValue::Text("hello".to_string()));
        let err = executor()
            .dispatch(IntentKind::SendDm, PermissionLevel::Standard, call(args))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSlot { .. }));
    }

    #[tokio::test]
    async fn permission_gate_precedes_argument_validation() {
        let err = executor()
            .dispatch(IntentKind::SetStatus, PermissionLevel::Standard, call(BTreeMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PermissionDenied { .. }));
    }

    #[test]
    fn incomplete_registry_fails_the_completeness_check() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(SendDmStub)).unwrap();
        assert!(registry.ensure_complete().is_err());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(SendDmStub)).unwrap();
        assert!(registry.register(Arc::new(SendDmStub)).is_err());
    }
}
