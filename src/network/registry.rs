//! Connection Registry
//!
//! Live, approved transport links and the user each one belongs to.
//! The mapping is kept 1:1 in both directions.

use std::collections::BTreeMap;

use crate::lobby::user::UserId;
use crate::network::transport::ConnectionId;

/// Registered connections.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRegistry {
    by_conn: BTreeMap<ConnectionId, UserId>,
    by_user: BTreeMap<UserId, ConnectionId>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user.
    ///
    /// Returns false, leaving the registry untouched, if the connection
    /// or the user is already registered.
    pub fn add(&mut self, conn: ConnectionId, user: UserId) -> bool {
        if self.by_conn.contains_key(&conn) || self.by_user.contains_key(&user) {
            return false;
        }
        self.by_user.insert(user.clone(), conn);
        self.by_conn.insert(conn, user);
        true
    }

    /// Remove a connection, returning its user.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<UserId> {
        let user = self.by_conn.remove(&conn)?;
        self.by_user.remove(&user);
        Some(user)
    }

    /// Remove every connection for which `is_alive` is false.
    /// Returns the removed pairs.
    pub fn prune(&mut self, is_alive: impl Fn(ConnectionId) -> bool) -> Vec<(ConnectionId, UserId)> {
        let dead: Vec<ConnectionId> = self.by_conn.keys()
            .copied()
            .filter(|conn| !is_alive(*conn))
            .collect();

        dead.into_iter()
            .filter_map(|conn| self.remove(conn).map(|user| (conn, user)))
            .collect()
    }

    /// Whether a connection is registered.
    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.by_conn.contains_key(&conn)
    }

    /// User owning a connection.
    pub fn user_for(&self, conn: ConnectionId) -> Option<&UserId> {
        self.by_conn.get(&conn)
    }

    /// Connection owned by a user.
    pub fn connection_for(&self, user: &UserId) -> Option<ConnectionId> {
        self.by_user.get(user).copied()
    }

    /// All registered connections.
    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.by_conn.keys().copied()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.by_conn.len(), self.by_user.len(), "registry maps diverged");
        self.by_conn.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    /// Drop everything, returning what was registered.
    pub fn clear(&mut self) -> Vec<ConnectionId> {
        self.by_user.clear();
        std::mem::take(&mut self.by_conn).into_keys().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.add(ConnectionId(1), UserId::new("a")));

        assert!(registry.contains(ConnectionId(1)));
        assert_eq!(registry.user_for(ConnectionId(1)), Some(&UserId::new("a")));
        assert_eq!(registry.connection_for(&UserId::new("a")), Some(ConnectionId(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_twice_rejected() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.add(ConnectionId(1), UserId::new("a")));
        assert!(!registry.add(ConnectionId(1), UserId::new("b")));
        assert!(!registry.add(ConnectionId(2), UserId::new("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_prune_dead() {
        let mut registry = ConnectionRegistry::new();
        registry.add(ConnectionId(1), UserId::new("a"));
        registry.add(ConnectionId(2), UserId::new("b"));
        registry.add(ConnectionId(3), UserId::new("c"));

        let removed = registry.prune(|conn| conn != ConnectionId(2));

        assert_eq!(removed, vec![(ConnectionId(2), UserId::new("b"))]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connection_for(&UserId::new("b")), None);
    }

    #[test]
    fn test_remove_unknown() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.remove(ConnectionId(7)), None);
    }

    #[test]
    fn test_clear() {
        let mut registry = ConnectionRegistry::new();
        registry.add(ConnectionId(1), UserId::new("a"));
        registry.add(ConnectionId(2), UserId::new("b"));
        assert_eq!(registry.clear(), vec![ConnectionId(1), ConnectionId(2)]);
        assert!(registry.is_empty());
    }
}
