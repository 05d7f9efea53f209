//! Connection registry: live sockets, which user each one is registered under,
//! and which ones currently count as active visitors.
//!
//! Plain data structure with `&mut self` operations; `PresenceService` owns the
//! single shared instance behind a lock. Unknown connection ids are no-ops.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::models::{generate_connection_id, ConnectionId, Identity, Role, UserId};

/// Outbound queue of serialized events for one socket.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Debug)]
pub struct ConnectionEntry {
    pub user_id: Option<UserId>,
    pub role: Option<Role>,
    /// Identity proven by the token presented at upgrade, if any.
    pub identity: Option<Identity>,
    /// `None` once the sweep has dropped a stale heartbeat.
    pub last_heartbeat: Option<Instant>,
    tx: Outbound,
}

/// Read-only view of a connection for callers outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub user_id: Option<UserId>,
    pub role: Option<Role>,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    /// The user had no connection before this one.
    pub came_online: bool,
    /// The connection was moved away from this user and left them with none.
    pub previous_went_offline: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    pub user_id: Option<UserId>,
    pub went_offline: bool,
    pub was_visitor: bool,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// user -> registered connections. A connection is in at most one set.
    users: HashMap<UserId, HashSet<ConnectionId>>,
    /// Active visitor set: explicitly visible with a fresh heartbeat.
    visitors: HashSet<ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. Its heartbeat starts now; it is not yet visible.
    pub fn connect(&mut self, tx: Outbound, identity: Option<Identity>, now: Instant) -> ConnectionId {
        let id = generate_connection_id();
        self.connections.insert(
            id.clone(),
            ConnectionEntry {
                user_id: None,
                role: None,
                identity,
                last_heartbeat: Some(now),
                tx,
            },
        );
        id
    }

    /// Associate `conn` with `user_id`. Returns `None` for an unknown connection.
    pub fn register(&mut self, conn: &str, user_id: &str, role: Role) -> Option<Registered> {
        let entry = self.connections.get_mut(conn)?;
        let previous = entry.user_id.replace(user_id.to_string());
        entry.role = Some(role);

        let mut previous_went_offline = None;
        if let Some(prev) = previous.filter(|p| p != user_id) {
            if Self::detach(&mut self.users, &prev, conn) {
                previous_went_offline = Some(prev);
            }
        }

        let set = self.users.entry(user_id.to_string()).or_default();
        let came_online = set.is_empty();
        set.insert(conn.to_string());
        Some(Registered {
            came_online,
            previous_went_offline,
        })
    }

    /// Remove `conn` from every collection. Returns `None` if it was already gone.
    pub fn disconnect(&mut self, conn: &str) -> Option<Disconnected> {
        let entry = self.connections.remove(conn)?;
        let was_visitor = self.visitors.remove(conn);
        let went_offline = match &entry.user_id {
            Some(user) => Self::detach(&mut self.users, user, conn),
            None => false,
        };
        Some(Disconnected {
            user_id: entry.user_id,
            went_offline,
            was_visitor,
        })
    }

    /// Drop `conn` from `user`'s set; true if that emptied the set.
    fn detach(users: &mut HashMap<UserId, HashSet<ConnectionId>>, user: &str, conn: &str) -> bool {
        let Some(set) = users.get_mut(user) else {
            return false;
        };
        set.remove(conn);
        if set.is_empty() {
            users.remove(user);
            true
        } else {
            false
        }
    }

    /// Add to / remove from the active visitor set. Becoming visible is also a
    /// liveness signal and refreshes the heartbeat. Returns whether membership
    /// changed, or `None` for an unknown connection.
    pub fn set_visibility(&mut self, conn: &str, visible: bool, now: Instant) -> Option<bool> {
        let entry = self.connections.get_mut(conn)?;
        if visible {
            entry.last_heartbeat = Some(now);
            Some(self.visitors.insert(conn.to_string()))
        } else {
            Some(self.visitors.remove(conn))
        }
    }

    /// Refresh the heartbeat. Never adds to the visitor set.
    pub fn heartbeat(&mut self, conn: &str, now: Instant) -> bool {
        match self.connections.get_mut(conn) {
            Some(entry) => {
                entry.last_heartbeat = Some(now);
                true
            }
            None => false,
        }
    }

    /// Drop every heartbeat older than `timeout` and evict those connections from
    /// the visitor set. Returns the evicted visitors.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        for (id, entry) in self.connections.iter_mut() {
            let stale = entry
                .last_heartbeat
                .is_some_and(|t| now.saturating_duration_since(t) > timeout);
            if !stale {
                continue;
            }
            entry.last_heartbeat = None;
            if self.visitors.remove(id) {
                evicted.push(id.clone());
            }
        }
        evicted
    }

    pub fn snapshot(&self, conn: &str) -> Option<ConnectionSnapshot> {
        self.connections.get(conn).map(|e| ConnectionSnapshot {
            user_id: e.user_id.clone(),
            role: e.role,
            identity: e.identity.clone(),
        })
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|s| !s.is_empty())
    }

    /// Online users, sorted.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn connections_of(&self, user_id: &str) -> usize {
        self.users.get(user_id).map_or(0, HashSet::len)
    }

    pub fn visitor_count(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_visitor(&self, conn: &str) -> bool {
        self.visitors.contains(conn)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn sender(&self, conn: &str) -> Option<&Outbound> {
        self.connections.get(conn).map(|e| &e.tx)
    }

    /// Every connection registered under `user_id`.
    pub fn senders_for_user(&self, user_id: &str) -> Vec<(&str, &Outbound)> {
        self.users
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id).map(|e| (id.as_str(), &e.tx)))
            .collect()
    }

    pub fn all_senders(&self) -> impl Iterator<Item = (&str, &Outbound)> {
        self.connections.iter().map(|(id, e)| (id.as_str(), &e.tx))
    }
}
