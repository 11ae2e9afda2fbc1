use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use super::connection::{Connection, ConnectionId, GroupKey};

/// Which live connections a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    All,
    Group(GroupKey),
    /// Everyone in the group except one connection (usually the sender).
    GroupExcept(GroupKey, ConnectionId),
}

type Group = HashMap<ConnectionId, Arc<Connection>>;

/// Live connections indexed by group key.
///
/// Only the owning hub loop mutates it; broadcasts and HTTP handlers read
/// snapshots under the shared lock.
#[derive(Default)]
pub struct Registry {
    groups: RwLock<HashMap<GroupKey, Group>>,
}

impl Registry {
    /// Insert the connection. Returns `false` if this instance was already present.
    pub(super) async fn insert(&self, connection: Arc<Connection>) -> bool {
        let mut groups = self.groups.write().await;
        let group = groups.entry(connection.group()).or_default();
        if group.contains_key(&connection.id()) {
            return false;
        }
        group.insert(connection.id(), connection);
        true
    }

    /// Remove the connection if present; empty groups are dropped.
    pub(super) async fn remove(&self, connection: &Connection) -> Option<Arc<Connection>> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(&connection.group())?;
        let removed = group.remove(&connection.id());
        if group.is_empty() {
            groups.remove(&connection.group());
        }
        removed
    }

    pub(super) async fn drain(&self) -> Vec<Arc<Connection>> {
        let mut groups = self.groups.write().await;
        groups
            .drain()
            .flat_map(|(_, group)| group.into_values())
            .collect()
    }

    /// Snapshot of the connections matching `selector`.
    pub async fn select(&self, selector: Selector) -> Vec<Arc<Connection>> {
        let groups = self.groups.read().await;
        match selector {
            Selector::All => groups
                .values()
                .flat_map(|group| group.values().cloned())
                .collect(),
            Selector::Group(key) => groups
                .get(&key)
                .map(|group| group.values().cloned().collect())
                .unwrap_or_default(),
            Selector::GroupExcept(key, excluded) => groups
                .get(&key)
                .map(|group| {
                    group
                        .values()
                        .filter(|connection| connection.id() != excluded)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        let groups = self.groups.read().await;
        groups.values().any(|group| group.contains_key(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn connection(group: GroupKey) -> Arc<Connection> {
        Connection::new(Identity::default(), group, 4).0
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_instance() {
        let registry = Registry::default();
        let conn = connection(1);

        assert!(registry.insert(conn.clone()).await);
        assert!(!registry.insert(conn.clone()).await);
        assert_eq!(registry.select(Selector::All).await.len(), 1);
    }

    #[tokio::test]
    async fn remove_twice_is_a_no_op() {
        let registry = Registry::default();
        let conn = connection(1);
        registry.insert(conn.clone()).await;

        assert!(registry.remove(&conn).await.is_some());
        assert!(registry.remove(&conn).await.is_none());
        assert!(!registry.contains(conn.id()).await);
    }

    #[tokio::test]
    async fn selectors_filter_by_group_and_exclusion() {
        let registry = Registry::default();
        let a = connection(1);
        let b = connection(1);
        let c = connection(2);
        for conn in [&a, &b, &c] {
            registry.insert(conn.clone()).await;
        }

        assert_eq!(registry.select(Selector::All).await.len(), 3);
        assert_eq!(registry.select(Selector::Group(1)).await.len(), 2);
        let others = registry.select(Selector::GroupExcept(1, a.id())).await;
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id(), b.id());
        assert!(registry.select(Selector::Group(9)).await.is_empty());
    }
}
