use serde::{Deserialize, Serialize};

/// Actor privilege level, checked against each capability's requirement
/// before dispatch. Ordering is the privilege ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Standard,
    Elevated,
    Owner,
}

impl Default for PermissionLevel {
    fn default() -> Self {
        PermissionLevel::Standard
    }
}
