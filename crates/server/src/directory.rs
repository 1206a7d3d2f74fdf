//! Directory pool and permission grants sourced from configuration.

use std::collections::HashMap;

use async_trait::async_trait;

use herald_agent::resolve::EntityPool;
use herald_core::config::{ActorGrant, DirectoryEntry};
use herald_core::{ActorId, EntityId, EntityKind, EntityRecord, PermissionLevel};

/// A fixed entity pool built once at startup. Deployments with a live
/// platform behind them swap in their own `EntityPool`.
pub struct ConfigPool {
    records: Vec<EntityRecord>,
}

impl ConfigPool {
    pub fn from_entries(entries: &[DirectoryEntry]) -> Self {
        let records = entries
            .iter()
            .map(|entry| EntityRecord {
                id: EntityId(entry.id.clone()),
                kind: entry.kind,
                display_name: entry.name.clone(),
                aliases: entry.aliases.clone(),
            })
            .collect();
        Self { records }
    }
}

#[async_trait]
impl EntityPool for ConfigPool {
    async fn entries(&self, kind: EntityKind) -> anyhow::Result<Vec<EntityRecord>> {
        Ok(self.records.iter().filter(|record| record.kind == kind).cloned().collect())
    }
}

pub fn permission_map(grants: &[ActorGrant]) -> HashMap<ActorId, PermissionLevel> {
    grants.iter().map(|grant| (ActorId(grant.id.clone()), grant.level)).collect()
}

#[cfg(test)]
mod tests {
    use herald_agent::resolve::EntityPool;
    use herald_core::config::{ActorGrant, DirectoryEntry};
    use herald_core::{ActorId, EntityKind, PermissionLevel};

    use super::{permission_map, ConfigPool};

    #[tokio::test]
    async fn pool_filters_by_kind() {
        let pool = ConfigPool::from_entries(&[
            DirectoryEntry {
                id: "u-1".into(),
                kind: EntityKind::Actor,
                name: "Jon".into(),
                aliases: vec![],
            },
            DirectoryEntry {
                id: "c-1".into(),
                kind: EntityKind::Channel,
                name: "general".into(),
                aliases: vec!["lobby".into()],
            },
        ]);
        let actors = pool.entries(EntityKind::Actor).await.unwrap();
        assert_eq!(actors.len(), 1);
        assert_eq!(actors[0].display_name, "Jon");
        let channels = pool.entries(EntityKind::Channel).await.unwrap();
        assert_eq!(channels[0].aliases, vec!["lobby".to_string()]);
    }

    #[test]
    fn grants_become_a_lookup_map() {
        let map = permission_map(&[ActorGrant {
            id: "u-9".into(),
            level: PermissionLevel::Owner,
        }]);
        assert_eq!(map.get(&ActorId("u-9".into())), Some(&PermissionLevel::Owner));
        assert!(map.get(&ActorId("u-1".into())).is_none());
    }
}
