//! Fan-out of server events to connected sockets: everyone, one user's tabs, or one socket.

use tracing::{debug, warn};

use crate::models::ServerEvent;
use crate::services::presence::SharedRegistry;

/// Delivers events over the outbound queues held in the registry.
#[derive(Clone)]
pub struct Notifier {
    registry: SharedRegistry,
}

impl Notifier {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Send to every live connection. Returns how many queues accepted it.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let payload = event.to_json();
        let registry = self.registry.read().await;
        let mut sent = 0;
        for (id, tx) in registry.all_senders() {
            if tx.send(payload.clone()).is_ok() {
                sent += 1;
            } else {
                debug!(connection_id = %id, "broadcast to closed connection");
            }
        }
        sent
    }

    /// Send to every connection registered under `user_id` (all tabs).
    pub async fn to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        let payload = event.to_json();
        let registry = self.registry.read().await;
        let mut sent = 0;
        for (id, tx) in registry.senders_for_user(user_id) {
            if tx.send(payload.clone()).is_ok() {
                sent += 1;
            } else {
                debug!(connection_id = %id, user_id = %user_id, "send to closed connection");
            }
        }
        sent
    }

    /// Send to one connection. False if it is gone.
    pub async fn to_connection(&self, conn: &str, event: &ServerEvent) -> bool {
        let registry = self.registry.read().await;
        match registry.sender(conn) {
            Some(tx) => tx.send(event.to_json()).is_ok(),
            None => {
                warn!(connection_id = %conn, "reply to unknown connection dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::presence::PresenceService;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn targeted_send_reaches_every_tab_and_nobody_else() {
        let presence = PresenceService::new(Duration::from_secs(10));
        let notifier = Notifier::new(presence.registry());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        let a = presence.connect(tx_a, None).await;
        let b = presence.connect(tx_b, None).await;
        let c = presence.connect(tx_c, None).await;
        presence.register(&a, "u1", Role::User).await;
        presence.register(&b, "u1", Role::User).await;
        presence.register(&c, "u2", Role::User).await;

        let event = ServerEvent::UserTyping {
            user_id: "u2".into(),
            is_typing: true,
        };
        assert_eq!(notifier.to_user("u1", &event).await, 2);
        assert_eq!(rx_a.try_recv().unwrap(), event.to_json());
        assert_eq!(rx_b.try_recv().unwrap(), event.to_json());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_anonymous_connections() {
        let presence = PresenceService::new(Duration::from_secs(10));
        let notifier = Notifier::new(presence.registry());
        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.connect(tx, None).await;
        let sent = notifier.broadcast(&ServerEvent::VisitorCount { count: 3 }).await;
        assert_eq!(sent, 1);
        assert!(rx.try_recv().unwrap().contains("visitorCount"));
    }

    #[tokio::test]
    async fn closed_queue_is_not_counted() {
        let presence = PresenceService::new(Duration::from_secs(10));
        let notifier = Notifier::new(presence.registry());
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = presence.connect(tx, None).await;
        drop(rx);
        assert!(!notifier.to_connection(&conn, &ServerEvent::Pong).await);
        assert!(!notifier.to_connection("ghost", &ServerEvent::Pong).await);
    }
}
