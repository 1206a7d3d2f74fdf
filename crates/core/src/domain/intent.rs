use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Closed enumeration of actions the deterministic pipeline understands.
///
/// Registration order matters: it is the final tie-break when two intents
/// score identically during recognition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    SendDm,
    SendMessage,
    CreateMirror,
    DisableMirror,
    ListMirrors,
    AddWatcher,
    RemoveWatcher,
    ListWatchers,
    ShowStats,
    SetStatus,
    ShowHealth,
    ShowQueue,
    ListCapabilities,
}

impl IntentKind {
    /// The capability each intent dispatches to.
    pub fn capability(&self) -> &'static str {
        match self {
            IntentKind::SendDm => "send_dm",
            IntentKind::SendMessage => "send_message",
            IntentKind::CreateMirror => "create_mirror",
            IntentKind::DisableMirror => "disable_mirror",
            IntentKind::ListMirrors => "list_mirrors",
            IntentKind::AddWatcher => "add_watcher",
            IntentKind::RemoveWatcher => "remove_watcher",
            IntentKind::ListWatchers => "list_watchers",
            IntentKind::ShowStats => "show_stats",
            IntentKind::SetStatus => "set_status",
            IntentKind::ShowHealth => "show_health",
            IntentKind::ShowQueue => "show_queue",
            IntentKind::ListCapabilities => "list_capabilities",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IntentKind::SendDm => "Send DM",
            IntentKind::SendMessage => "Send message",
            IntentKind::CreateMirror => "Create mirror",
            IntentKind::DisableMirror => "Disable mirror",
            IntentKind::ListMirrors => "List mirrors",
            IntentKind::AddWatcher => "Add watcher",
            IntentKind::RemoveWatcher => "Remove watcher",
            IntentKind::ListWatchers => "List watchers",
            IntentKind::ShowStats => "Show stats",
            IntentKind::SetStatus => "Set status",
            IntentKind::ShowHealth => "Show health",
            IntentKind::ShowQueue => "Show queue",
            IntentKind::ListCapabilities => "List capabilities",
        }
    }
}

/// Slot name → raw string, as captured by the recognizer before resolution.
pub type SlotMap = BTreeMap<String, String>;

/// A recognized intent with its raw slot strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub slots: SlotMap,
}

impl Intent {
    pub fn new(kind: IntentKind) -> Self {
        Self { kind, slots: SlotMap::new() }
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.slots.insert(name.into(), value.into());
        self
    }

    pub fn slot(&self, name: &str) -> Option<&str> {
        self.slots.get(name).map(String::as_str)
    }
}
