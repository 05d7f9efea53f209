//! Presence: online users, active visitors and the heartbeat sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::models::{ConnectionId, Identity, Role, UserId};
use crate::services::registry::{
    ConnectionRegistry, ConnectionSnapshot, Disconnected, Outbound, Registered,
};

/// Registry shared between presence and fan-out.
pub type SharedRegistry = Arc<RwLock<ConnectionRegistry>>;

/// Owns the process-wide connection registry. Construct once per process (or
/// per test) and clone freely; clones share state.
#[derive(Clone)]
pub struct PresenceService {
    registry: SharedRegistry,
    heartbeat_timeout: Duration,
}

impl PresenceService {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(RwLock::new(ConnectionRegistry::new())),
            heartbeat_timeout,
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    pub async fn connect(&self, tx: Outbound, identity: Option<Identity>) -> ConnectionId {
        let id = self
            .registry
            .write()
            .await
            .connect(tx, identity, Instant::now());
        info!(connection_id = %id, "connection opened");
        id
    }

    #[instrument(skip(self))]
    pub async fn register(&self, conn: &str, user_id: &str, role: Role) -> Option<Registered> {
        let outcome = self.registry.write().await.register(conn, user_id, role);
        match &outcome {
            Some(r) if r.came_online => info!(user_id = %user_id, "user online"),
            Some(_) => debug!(user_id = %user_id, "additional connection registered"),
            None => debug!("register on unknown connection ignored"),
        }
        outcome
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&self, conn: &str) -> Option<Disconnected> {
        let outcome = self.registry.write().await.disconnect(conn);
        if let Some(Disconnected {
            user_id: Some(user),
            went_offline: true,
            ..
        }) = &outcome
        {
            info!(user_id = %user, "user offline");
        }
        outcome
    }

    /// Returns `Some(true)` if active-visitor membership changed.
    pub async fn set_visibility(&self, conn: &str, visible: bool) -> Option<bool> {
        self.registry
            .write()
            .await
            .set_visibility(conn, visible, Instant::now())
    }

    pub async fn heartbeat(&self, conn: &str) -> bool {
        self.heartbeat_at(conn, Instant::now()).await
    }

    pub async fn heartbeat_at(&self, conn: &str, now: Instant) -> bool {
        let known = self.registry.write().await.heartbeat(conn, now);
        debug!(connection_id = %conn, known, "heartbeat");
        known
    }

    /// Evict visitors whose heartbeat is older than the timeout.
    pub async fn sweep(&self) -> Vec<ConnectionId> {
        self.sweep_at(Instant::now()).await
    }

    pub async fn sweep_at(&self, now: Instant) -> Vec<ConnectionId> {
        let evicted = self
            .registry
            .write()
            .await
            .evict_stale(now, self.heartbeat_timeout);
        if evicted.is_empty() {
            debug!("sweep: nothing stale");
        } else {
            info!(count = evicted.len(), "sweep evicted stale visitors");
        }
        evicted
    }

    pub async fn snapshot(&self, conn: &str) -> Option<ConnectionSnapshot> {
        self.registry.read().await.snapshot(conn)
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.registry.read().await.is_online(user_id)
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.registry.read().await.online_users()
    }

    pub async fn visitor_count(&self) -> usize {
        self.registry.read().await.visitor_count()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connection_count()
    }
}
