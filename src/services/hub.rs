//! Chat hub: turns socket commands into presence, delivery and stats calls and
//! fans the resulting events out. Transport-agnostic; the websocket handler
//! only parses frames and forwards them here.

use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{
    ClientMessage, ConnectionId, Identity, MarkSeenPayload, MessageId, RegisterPayload,
    SendMessagePayload, ServerEvent, TypingPayload,
};
use crate::services::{
    AuthService, DeliveryService, Notifier, Outbound, PresenceService, StatsService,
};

/// Socket error codes that do not come from `AppError::code`.
pub const NOT_REGISTERED: &str = "not_registered";
pub const IDENTITY_MISMATCH: &str = "identity_mismatch";

#[derive(Clone)]
pub struct ChatHub {
    presence: PresenceService,
    notifier: Notifier,
    delivery: DeliveryService,
    stats: StatsService,
    auth: AuthService,
}

impl ChatHub {
    pub fn new(
        presence: PresenceService,
        delivery: DeliveryService,
        stats: StatsService,
        auth: AuthService,
    ) -> Self {
        let notifier = Notifier::new(presence.registry());
        Self {
            presence,
            notifier,
            delivery,
            stats,
            auth,
        }
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub fn delivery(&self) -> &DeliveryService {
        &self.delivery
    }

    pub fn stats(&self) -> &StatsService {
        &self.stats
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// Register a new socket and greet it with its connection id.
    pub async fn open(&self, tx: Outbound, identity: Option<Identity>) -> ConnectionId {
        let conn = self.presence.connect(tx, identity).await;
        self.notifier
            .to_connection(
                &conn,
                &ServerEvent::ConnectionEstablished {
                    connection_id: conn.clone(),
                },
            )
            .await;
        conn
    }

    /// Parse one text frame and handle it. A known event whose payload does not
    /// parse is answered with an `invalid_payload` error, echoing `clientTempId`
    /// when the frame carries one. Anything else unparseable is ignored.
    pub async fn handle_frame(&self, conn: &str, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(connection_id = %conn, error = %e, "ignored non-json frame");
                return;
            }
        };
        let event = value
            .get("event")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let temp = value
            .pointer("/data/clientTempId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match serde_json::from_value::<ClientMessage>(value) {
            Ok(msg) => self.handle(conn, msg).await,
            Err(e) => match event {
                Some(event) if ClientMessage::is_known_event(&event) => {
                    self.reply_app_error(conn, &AppError::from(e), temp).await
                }
                _ => debug!(connection_id = %conn, event = ?event, "ignored unknown frame"),
            },
        }
    }

    /// Handle one inbound command to completion.
    pub async fn handle(&self, conn: &str, msg: ClientMessage) {
        match msg {
            ClientMessage::Register { data } => self.on_register(conn, data).await,
            ClientMessage::VisibilityChange { data } => {
                self.on_visibility(conn, data.is_visible).await
            }
            ClientMessage::Heartbeat => {
                self.presence.heartbeat(conn).await;
            }
            ClientMessage::SendMessage { data } => self.on_send(conn, data).await,
            ClientMessage::MarkSeen { data } => self.on_mark_seen(conn, data).await,
            ClientMessage::Typing { data } => self.on_typing(conn, data).await,
            ClientMessage::GetVisitorCount => {
                let count = self.presence.visitor_count().await;
                self.notifier
                    .to_connection(conn, &ServerEvent::VisitorCount { count })
                    .await;
            }
            ClientMessage::GetOnlineUsers => {
                let users = self.presence.online_users().await;
                self.notifier
                    .to_connection(conn, &ServerEvent::OnlineUsers { users })
                    .await;
            }
            ClientMessage::Ping => {
                self.notifier.to_connection(conn, &ServerEvent::Pong).await;
            }
        }
    }

    async fn on_register(&self, conn: &str, data: RegisterPayload) {
        let Some(snapshot) = self.presence.snapshot(conn).await else {
            debug!(connection_id = %conn, "register from closed connection");
            return;
        };
        let role = match self
            .auth
            .authorize_register(snapshot.identity.as_ref(), &data.user_id, data.role)
        {
            Ok(role) => role,
            Err(e) => {
                warn!(connection_id = %conn, user_id = %data.user_id, error = %e, "register rejected");
                return;
            }
        };
        let Some(registered) = self.presence.register(conn, &data.user_id, role).await else {
            return;
        };
        if let Some(prev) = registered.previous_went_offline {
            self.notifier
                .broadcast(&ServerEvent::UserOnline {
                    user_id: prev,
                    online: false,
                })
                .await;
        }
        if registered.came_online {
            self.notifier
                .broadcast(&ServerEvent::UserOnline {
                    user_id: data.user_id.clone(),
                    online: true,
                })
                .await;
        }
        let users = self.presence.online_users().await;
        self.notifier
            .to_connection(conn, &ServerEvent::OnlineUsers { users })
            .await;

        match self.delivery.deliver_pending(&data.user_id).await {
            Ok(by_sender) => {
                for (sender, message_ids) in by_sender {
                    self.notifier
                        .to_user(&sender, &ServerEvent::MessageDelivered { message_ids })
                        .await;
                }
            }
            Err(e) => error!(user_id = %data.user_id, error = %e, "pending delivery failed"),
        }
    }

    async fn on_visibility(&self, conn: &str, visible: bool) {
        let Some(changed) = self.presence.set_visibility(conn, visible).await else {
            return;
        };
        let count = self.presence.visitor_count().await;
        if changed && visible {
            self.stats.record_visitor_event(conn).await;
            self.stats.update_peak(count).await;
        }
        self.notifier
            .broadcast(&ServerEvent::VisitorCount { count })
            .await;
    }

    /// The connection must be registered as `actor`.
    async fn check_actor(&self, conn: &str, actor: &str) -> Result<(), (&'static str, String)> {
        let registered = self
            .presence
            .snapshot(conn)
            .await
            .and_then(|s| s.user_id);
        match registered {
            None => Err((NOT_REGISTERED, "register before sending".to_string())),
            Some(user) if user != actor => Err((
                IDENTITY_MISMATCH,
                format!("connection is registered as {}", user),
            )),
            Some(_) => Ok(()),
        }
    }

    async fn reply_error(&self, conn: &str, code: &str, message: String, temp: Option<String>) {
        self.notifier
            .to_connection(conn, &ServerEvent::error(code, message, temp))
            .await;
    }

    async fn reply_app_error(&self, conn: &str, e: &AppError, temp: Option<String>) {
        match e {
            AppError::Validation(_) | AppError::Serialization(_) => {
                debug!(connection_id = %conn, error = %e, "rejected payload")
            }
            _ => error!(connection_id = %conn, error = %e, "chat operation failed"),
        }
        self.reply_error(conn, e.code(), e.to_string(), temp).await;
    }

    async fn on_send(&self, conn: &str, data: SendMessagePayload) {
        let temp = data.client_temp_id.clone();
        if let Err((code, message)) = self.check_actor(conn, &data.sender_id).await {
            self.reply_error(conn, code, message, temp).await;
            return;
        }
        let message = match self.delivery.create_message(&data).await {
            Ok(m) => m,
            Err(e) => {
                self.reply_app_error(conn, &e, temp).await;
                return;
            }
        };
        info!(message_id = %message.id, user_id = %message.sender_id, "message sent");
        self.notifier
            .to_user(
                &message.sender_id,
                &ServerEvent::MessageSent {
                    client_temp_id: temp,
                    message: message.clone(),
                },
            )
            .await;

        if !self.presence.is_online(&message.recipient_id).await {
            return;
        }
        let pushed = match self.delivery.mark_delivered(&message).await {
            Ok(Some(delivered)) => {
                self.notifier
                    .to_user(
                        &message.sender_id,
                        &ServerEvent::MessageDelivered {
                            message_ids: vec![delivered.id.clone()],
                        },
                    )
                    .await;
                delivered
            }
            Ok(None) => message,
            Err(e) => {
                error!(message_id = %message.id, error = %e, "delivered transition failed");
                message
            }
        };
        let recipient = pushed.recipient_id.clone();
        self.notifier
            .to_user(&recipient, &ServerEvent::NewMessage { message: pushed })
            .await;
    }

    async fn on_mark_seen(&self, conn: &str, data: MarkSeenPayload) {
        if let Err((code, message)) = self.check_actor(conn, &data.viewer_id).await {
            self.reply_error(conn, code, message, None).await;
            return;
        }
        if let Err(e) = self
            .acknowledge_seen(&data.viewer_id, &data.other_party_id)
            .await
        {
            self.reply_app_error(conn, &e, None).await;
        }
    }

    /// `viewer` read everything `other` sent them; tell `other` which messages
    /// moved to `seen`. Shared by the socket and the HTTP receipt route.
    pub async fn acknowledge_seen(&self, viewer: &str, other: &str) -> AppResult<Vec<MessageId>> {
        let message_ids = self.delivery.mark_seen(viewer, other).await?;
        if !message_ids.is_empty() {
            self.notifier
                .to_user(
                    other,
                    &ServerEvent::MessagesSeen {
                        by: viewer.to_string(),
                        message_ids: message_ids.clone(),
                    },
                )
                .await;
        }
        Ok(message_ids)
    }

    /// `recipient` confirmed receipt of what `sender` sent; tell `sender` which
    /// messages moved to `delivered`.
    pub async fn acknowledge_delivered(
        &self,
        recipient: &str,
        sender: &str,
    ) -> AppResult<Vec<MessageId>> {
        let message_ids = self.delivery.deliver_from(recipient, sender).await?;
        if !message_ids.is_empty() {
            self.notifier
                .to_user(
                    sender,
                    &ServerEvent::MessageDelivered {
                        message_ids: message_ids.clone(),
                    },
                )
                .await;
        }
        Ok(message_ids)
    }

    async fn on_typing(&self, conn: &str, data: TypingPayload) {
        if let Err((code, message)) = self.check_actor(conn, &data.sender_id).await {
            self.reply_error(conn, code, message, None).await;
            return;
        }
        self.notifier
            .to_user(
                &data.recipient_id,
                &ServerEvent::UserTyping {
                    user_id: data.sender_id,
                    is_typing: data.is_typing,
                },
            )
            .await;
    }

    /// Socket closed. Unknown ids are ignored.
    pub async fn close(&self, conn: &str) {
        let Some(gone) = self.presence.disconnect(conn).await else {
            return;
        };
        if let (Some(user_id), true) = (gone.user_id, gone.went_offline) {
            self.notifier
                .broadcast(&ServerEvent::UserOnline {
                    user_id,
                    online: false,
                })
                .await;
        }
        if gone.was_visitor {
            let count = self.presence.visitor_count().await;
            self.notifier
                .broadcast(&ServerEvent::VisitorCount { count })
                .await;
        }
    }

    pub async fn sweep(&self) -> Vec<ConnectionId> {
        self.sweep_at(Instant::now()).await
    }

    /// Evict stale visitors; one `visitorCount` broadcast if any were removed.
    pub async fn sweep_at(&self, now: Instant) -> Vec<ConnectionId> {
        let evicted = self.presence.sweep_at(now).await;
        if !evicted.is_empty() {
            let count = self.presence.visitor_count().await;
            self.notifier
                .broadcast(&ServerEvent::VisitorCount { count })
                .await;
        }
        evicted
    }

    /// An order was placed on the storefront.
    pub async fn record_order(&self) -> AppResult<()> {
        self.stats.record_order_event().await
    }
}

/// Run the visitor sweep every `interval` until the task is aborted.
pub fn spawn_sweeper(hub: ChatHub, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            hub.sweep().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtSecret;
    use crate::repositories::MemoryStore;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn hub() -> ChatHub {
        let store = Arc::new(MemoryStore::new());
        ChatHub::new(
            PresenceService::new(Duration::from_secs(10)),
            DeliveryService::new(store.clone()),
            StatsService::new(store),
            AuthService::new(JwtSecret::new("secret".into()), false),
        )
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(s) = rx.try_recv() {
            out.push(serde_json::from_str(&s).unwrap());
        }
        out
    }

    fn send(from: &str, to: &str) -> ClientMessage {
        ClientMessage::SendMessage {
            data: SendMessagePayload {
                sender_id: from.into(),
                recipient_id: to.into(),
                body: "hi".into(),
                client_temp_id: Some("t1".into()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn open_greets_with_connection_id() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.open(tx, None).await;
        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "connectionEstablished");
        assert_eq!(events[0]["data"]["connectionId"], conn.as_str());
    }

    #[tokio::test]
    async fn send_before_register_is_refused() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.open(tx, None).await;
        drain(&mut rx);
        hub.handle(&conn, send("u1", "u2")).await;
        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "error");
        assert_eq!(events[0]["data"]["code"], NOT_REGISTERED);
        assert_eq!(events[0]["data"]["clientTempId"], "t1");
    }

    #[tokio::test]
    async fn send_as_someone_else_is_refused() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.open(tx, None).await;
        hub.handle(
            &conn,
            ClientMessage::Register {
                data: RegisterPayload {
                    user_id: "u1".into(),
                    role: None,
                },
            },
        )
        .await;
        drain(&mut rx);
        hub.handle(&conn, send("u3", "u2")).await;
        let events = drain(&mut rx);
        assert_eq!(events[0]["data"]["code"], IDENTITY_MISMATCH);
    }

    #[tokio::test]
    async fn register_with_foreign_token_is_ignored() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: "u1".into(),
            role: None,
        };
        let conn = hub.open(tx, Some(identity)).await;
        drain(&mut rx);
        hub.handle(
            &conn,
            ClientMessage::Register {
                data: RegisterPayload {
                    user_id: "u2".into(),
                    role: None,
                },
            },
        )
        .await;
        assert!(drain(&mut rx).is_empty());
        assert!(!hub.presence().is_online("u2").await);
    }

    #[tokio::test]
    async fn typing_goes_only_to_recipient() {
        let hub = hub();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = hub.open(tx1, None).await;
        let c2 = hub.open(tx2, None).await;
        for (c, u) in [(&c1, "u1"), (&c2, "u2")] {
            hub.handle(
                c,
                ClientMessage::Register {
                    data: RegisterPayload {
                        user_id: u.into(),
                        role: None,
                    },
                },
            )
            .await;
        }
        drain(&mut rx1);
        drain(&mut rx2);
        hub.handle(
            &c1,
            ClientMessage::Typing {
                data: TypingPayload {
                    sender_id: "u1".into(),
                    recipient_id: "u2".into(),
                    is_typing: true,
                },
            },
        )
        .await;
        assert!(drain(&mut rx1).is_empty());
        let events = drain(&mut rx2);
        assert_eq!(events[0]["event"], "userTyping");
        assert_eq!(events[0]["data"]["isTyping"], true);
    }

    #[tokio::test]
    async fn ping_and_count_queries_reply_to_caller() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.open(tx, None).await;
        drain(&mut rx);
        hub.handle(&conn, ClientMessage::Ping).await;
        hub.handle(&conn, ClientMessage::GetVisitorCount).await;
        hub.handle(&conn, ClientMessage::GetOnlineUsers).await;
        let names: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|e| e["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["pong", "visitorCount", "onlineUsers"]);
    }

    fn register(user: &str) -> ClientMessage {
        ClientMessage::Register {
            data: RegisterPayload {
                user_id: user.into(),
                role: None,
            },
        }
    }

    #[tokio::test]
    async fn malformed_send_frame_gets_error_reply() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.open(tx, None).await;
        hub.handle(&conn, register("u1")).await;
        drain(&mut rx);

        hub.handle_frame(
            &conn,
            r#"{"event":"sendMessage","data":{"senderId":"u1","recipientId":null,"body":"hi","clientTempId":"t9"}}"#,
        )
        .await;
        hub.handle_frame(&conn, r#"{"event":"sendMessage"}"#).await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e["event"] == "error"));
        assert!(events.iter().all(|e| e["data"]["code"] == "invalid_payload"));
        assert_eq!(events[0]["data"]["clientTempId"], "t9");
        assert!(events[1]["data"]["clientTempId"].is_null());
        assert!(hub.delivery().history("u1", "u2", Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_garbage_frames_are_ignored() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.open(tx, None).await;
        drain(&mut rx);
        hub.handle_frame(&conn, "not json").await;
        hub.handle_frame(&conn, r#"{"event":"subscribe","data":{}}"#).await;
        assert!(drain(&mut rx).is_empty());
        hub.handle_frame(&conn, r#"{"event":"ping"}"#).await;
        assert_eq!(drain(&mut rx)[0]["event"], "pong");
    }

    #[tokio::test]
    async fn seen_after_failed_attempt_still_notifies_sender() {
        let store = Arc::new(MemoryStore::new());
        let hub = ChatHub::new(
            PresenceService::new(Duration::from_secs(10)),
            DeliveryService::new(store.clone()),
            StatsService::new(store.clone()),
            AuthService::new(JwtSecret::new("secret".into()), false),
        );
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = hub.open(tx1, None).await;
        hub.handle(&c1, register("u1")).await;
        hub.handle(&c1, send("u1", "u2")).await;
        let c2 = hub.open(tx2, None).await;
        hub.handle(&c2, register("u2")).await;
        drain(&mut rx1);
        drain(&mut rx2);

        let seen = ClientMessage::MarkSeen {
            data: MarkSeenPayload {
                viewer_id: "u2".into(),
                other_party_id: "u1".into(),
            },
        };
        store.set_unavailable(true);
        hub.handle(&c2, seen.clone()).await;
        assert_eq!(drain(&mut rx2)[0]["data"]["code"], "persistence_failed");
        assert!(drain(&mut rx1).is_empty());

        store.set_unavailable(false);
        hub.handle(&c2, seen).await;
        let events = drain(&mut rx1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "messagesSeen");
        assert_eq!(events[0]["data"]["by"], "u2");
        let summary = hub.delivery().conversation("u2", "u1").await.unwrap().unwrap();
        assert_eq!(summary.unread_count, 0);
    }

    #[tokio::test]
    async fn store_outage_reports_error_to_sender_only() {
        let store = Arc::new(MemoryStore::new());
        let hub = ChatHub::new(
            PresenceService::new(Duration::from_secs(10)),
            DeliveryService::new(store.clone()),
            StatsService::new(store.clone()),
            AuthService::new(JwtSecret::new("secret".into()), false),
        );
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = hub.open(tx1, None).await;
        let c2 = hub.open(tx2, None).await;
        for (c, u) in [(&c1, "u1"), (&c2, "u2")] {
            hub.handle(
                c,
                ClientMessage::Register {
                    data: RegisterPayload {
                        user_id: u.into(),
                        role: None,
                    },
                },
            )
            .await;
        }
        drain(&mut rx1);
        drain(&mut rx2);
        store.set_unavailable(true);
        hub.handle(&c1, send("u1", "u2")).await;
        let events = drain(&mut rx1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"]["code"], "persistence_failed");
        assert!(drain(&mut rx2).is_empty());
    }
}
