//! Integration tests: health, admin stats auth, order events, chat history and
//! read receipts.
//!
//! Run with `cargo test`. Everything runs on the in-memory store; the
//! PostgreSQL round trip at the bottom needs `TEST_DATABASE_URL` (migrations
//! applied) and is skipped otherwise.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use storefront_live::auth::JwtSecret;
use storefront_live::db::{self, PgStore};
use storefront_live::models::{ClientMessage, RegisterPayload, Role, SendMessagePayload};
use storefront_live::repositories::{ChatStore, MemoryStore};
use storefront_live::services::{AuthService, ChatHub, DeliveryService, PresenceService, StatsService};
use storefront_live::{create_app, AppState};
use tokio::sync::mpsc;
use tower::util::ServiceExt;

const JWT: &str = "test-jwt-secret-min-32-chars!!";
const APP_KEY: &str = "test-key";

fn test_state() -> AppState {
    let store = Arc::new(MemoryStore::new());
    let hub = ChatHub::new(
        PresenceService::new(Duration::from_secs(10)),
        DeliveryService::new(store.clone()),
        StatsService::new(store),
        AuthService::new(JwtSecret::new(JWT.to_string()), false),
    );
    AppState {
        hub,
        app_key: APP_KEY.to_string(),
        allowed_origins: vec!["http://localhost:3000".to_string()],
        stats_history_days: 7,
        admin_user_id: Some("boss".to_string()),
        db: None,
    }
}

fn token(user: &str, role: Role) -> String {
    JwtSecret::new(JWT.to_string()).issue(user, Some(role)).unwrap()
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = create_app(test_state());
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
    assert_eq!(json.get("store").and_then(|v| v.as_str()), Some("memory"));
}

#[tokio::test]
async fn visitor_stats_requires_admin() {
    let app = create_app(test_state());

    let req = Request::builder()
        .uri("/api/admin/visitor-stats")
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/admin/visitor-stats")
        .header("authorization", format!("Bearer {}", token("u1", Role::User)))
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let req = Request::builder()
        .uri("/api/admin/visitor-stats?days=3")
        .header("cookie", format!("token={}", token("boss", Role::Admin)))
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["today"]["hourlyStats"].as_array().map(Vec::len), Some(24));
    assert_eq!(json["allTime"]["totalOrders"], 0);
    assert_eq!(json["activeVisitors"], 0);
}

#[tokio::test]
async fn order_event_requires_app_key_and_counts() {
    let state = test_state();
    let app = create_app(state.clone());

    let req = Request::builder()
        .method("POST")
        .uri("/api/events/order")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"orderId":"o-1"}"#))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method("POST")
        .uri("/api/events/order")
        .header("content-type", "application/json")
        .header("x-app-key", APP_KEY)
        .body(Body::from(r#"{"orderId":"o-1"}"#))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let report = state.hub().stats().report(1, 0).await.unwrap();
    assert_eq!(report.today.orders_received, 1);
    assert_eq!(report.all_time.total_orders, 1);
}

#[tokio::test]
async fn chat_history_and_conversations() {
    let state = test_state();
    let hub = state.hub().clone();
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = hub.open(tx, None).await;
    hub.handle(
        &conn,
        ClientMessage::Register {
            data: RegisterPayload {
                user_id: "alice".into(),
                role: None,
            },
        },
    )
    .await;
    for body in ["one", "two", "three"] {
        hub.handle(
            &conn,
            ClientMessage::SendMessage {
                data: SendMessagePayload {
                    sender_id: "alice".into(),
                    recipient_id: "bob".into(),
                    body: body.into(),
                    ..Default::default()
                },
            },
        )
        .await;
    }

    let app = create_app(state);
    let bob = token("bob", Role::User);

    let req = Request::builder()
        .uri("/api/chat/messages/alice?page=1&limit=2")
        .header("authorization", format!("Bearer {}", bob))
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["conversationId"], "alice:bob");
    let bodies: Vec<&str> = json["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["one", "two"]);

    let req = Request::builder()
        .uri("/api/chat/conversations")
        .header("authorization", format!("Bearer {}", bob))
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json[0]["otherUserId"], "alice");
    assert_eq!(json[0]["unreadCount"], 3);
}

/// Alice sends bob two messages while bob is offline; bob acknowledges them
/// over HTTP and alice's open socket hears about each step.
#[tokio::test]
async fn receipts_over_http_notify_the_sender() {
    let state = test_state();
    let hub = state.hub().clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = hub.open(tx, None).await;
    hub.handle(
        &conn,
        ClientMessage::Register {
            data: RegisterPayload {
                user_id: "alice".into(),
                role: None,
            },
        },
    )
    .await;
    for body in ["one", "two"] {
        hub.handle(
            &conn,
            ClientMessage::SendMessage {
                data: SendMessagePayload {
                    sender_id: "alice".into(),
                    recipient_id: "bob".into(),
                    body: body.into(),
                    ..Default::default()
                },
            },
        )
        .await;
    }
    while rx.try_recv().is_ok() {}

    let app = create_app(state);
    let bob = token("bob", Role::User);
    let put = |path: &str| {
        Request::builder()
            .method("PUT")
            .uri(path)
            .header("authorization", format!("Bearer {}", bob))
            .body(Body::empty())
            .unwrap()
    };

    let res = app.clone().oneshot(put("/api/chat/delivered/alice")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["messageIds"].as_array().map(Vec::len), Some(2));
    let pushed: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(pushed["event"], "messageDelivered");
    assert_eq!(pushed["data"]["messageIds"], json["messageIds"]);

    let res = app.clone().oneshot(put("/api/chat/delivered/alice")).await.unwrap();
    assert_eq!(body_json(res).await["messageIds"], serde_json::json!([]));
    assert!(rx.try_recv().is_err());

    let res = app.clone().oneshot(put("/api/chat/seen/alice")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let pushed: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(pushed["event"], "messagesSeen");
    assert_eq!(pushed["data"]["by"], "bob");
    assert_eq!(pushed["data"]["messageIds"].as_array().map(Vec::len), Some(2));
    let summary = hub.delivery().conversation("bob", "alice").await.unwrap().unwrap();
    assert_eq!(summary.unread_count, 0);

    let res = app.clone().oneshot(put("/api/chat/seen/bob")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method("PUT")
        .uri("/api/chat/seen/alice")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_contact_is_resolved() {
    let state = test_state();
    let app = create_app(state.clone());
    let req = Request::builder()
        .uri("/api/chat/admin")
        .header("authorization", format!("Bearer {}", token("shopper", Role::User)))
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["adminId"], "boss");
    assert_eq!(json["online"], false);

    let mut unset = state;
    unset.admin_user_id = None;
    let req = Request::builder()
        .uri("/api/chat/admin")
        .header("authorization", format!("Bearer {}", token("shopper", Role::User)))
        .body(Body::empty())
        .unwrap();
    let res = create_app(unset).oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_history_rejects_bad_token() {
    let app = create_app(test_state());
    let req = Request::builder()
        .uri("/api/chat/conversations")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(res).await;
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn postgres_store_round_trip() {
    let database_url = match std::env::var("TEST_DATABASE_URL") {
        Ok(u) => u,
        Err(_) => {
            eprintln!("Skip integration test: set TEST_DATABASE_URL");
            return;
        }
    };
    let pool = match db::create_pool(&database_url).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Skip integration test: {}", e);
            return;
        }
    };
    let store = PgStore::new(pool);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let (a, b) = (format!("a-{}", suffix), format!("b-{}", suffix));
    let m = storefront_live::models::Message::new(
        a.as_str(),
        b.as_str(),
        "hello",
        storefront_live::models::MessageType::Text,
        None,
    );
    let conv = store.insert_message(&m).await.unwrap();
    assert_eq!(conv.unread_for(&b), 1);
    let moved = store.deliver_pending(&b, Some(a.as_str()), chrono::Utc::now()).await.unwrap();
    assert_eq!(moved, vec![(a.clone(), m.id.clone())]);
    assert!(store.deliver_pending(&b, None, chrono::Utc::now()).await.unwrap().is_empty());
    let seen = store.mark_seen(&a, &b, chrono::Utc::now()).await.unwrap();
    assert_eq!(seen, vec![m.id.clone()]);
    let key = storefront_live::models::ConversationKey::new(&a, &b);
    let chat = store.conversation(&key).await.unwrap().unwrap();
    assert_eq!(chat.unread_for(&b), 0);

    // ("a:mid", "z") and ("a", "mid:z") must not share a chat row.
    let z = format!("z-{}", suffix);
    let (left, right) = (format!("{}:mid", a), format!("mid:{}", z));
    let joined = storefront_live::models::Message::new(
        left.as_str(),
        z.as_str(),
        "one",
        storefront_live::models::MessageType::Text,
        None,
    );
    let split = storefront_live::models::Message::new(
        a.as_str(),
        right.as_str(),
        "two",
        storefront_live::models::MessageType::Text,
        None,
    );
    assert_eq!(store.insert_message(&joined).await.unwrap().unread_for(&z), 1);
    let chat = store.insert_message(&split).await.unwrap();
    assert_eq!(chat.unread_for(&right), 1);
    assert_eq!(chat.unread_for(&z), 0);
}
