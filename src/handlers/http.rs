//! HTTP handlers: health, order events, chat history and read receipts.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::JwtSecret;
use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::{require_app_key, AuthUser};
use crate::models::{ConversationKey, ConversationSummary, OrderEventRequest};
use crate::repositories::Page;
use crate::services::ChatHub;

/// Shared application state for HTTP/WS and dashboard.
#[derive(Clone)]
pub struct AppState {
    pub hub: ChatHub,
    pub app_key: String,
    /// Origins allowed to open the socket; empty allows any.
    pub allowed_origins: Vec<String>,
    pub stats_history_days: u32,
    /// The store admin shoppers chat with.
    pub admin_user_id: Option<String>,
    /// Present when running on PostgreSQL; `None` means the in-memory store.
    pub db: Option<DbPool>,
}

impl AppState {
    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }
    pub fn jwt_secret(&self) -> &JwtSecret {
        self.hub.auth().jwt()
    }
    pub fn db(&self) -> Option<&DbPool> {
        self.db.as_ref()
    }
}

/// POST /api/events/order — the order service reports a placed order.
/// Requires header: x-app-key: <app_key>.
pub async fn record_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<OrderEventRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_app_key(&headers, &state.app_key)?;
    let order_id = body.and_then(|Json(b)| b.order_id);
    state.hub().record_order().await?;
    info!(order_id = ?order_id, "order event recorded");
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/chat/conversations
pub async fn conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    let list = state.hub().delivery().conversations(&user.user_id).await?;
    Ok(Json(list))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// GET /api/chat/messages/:other_user_id?page=&limit=
pub async fn messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(other_user_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    if other_user_id.trim().is_empty() || other_user_id == user.user_id {
        return Err(AppError::Validation("invalid conversation partner".to_string()));
    }
    let defaults = Page::default();
    let page = Page::new(
        q.page.unwrap_or(defaults.page),
        q.limit.unwrap_or(defaults.limit),
    );
    let messages = state
        .hub()
        .delivery()
        .history(&user.user_id, &other_user_id, page)
        .await?;
    Ok(Json(json!({
        "conversationId": ConversationKey::new(&user.user_id, &other_user_id).id(),
        "page": page.page,
        "limit": page.limit,
        "messages": messages,
    })))
}

fn receipt_partner(user: &AuthUser, sender_id: &str) -> Result<(), AppError> {
    if sender_id.trim().is_empty() || sender_id == user.user_id {
        return Err(AppError::Validation("invalid conversation partner".to_string()));
    }
    Ok(())
}

/// PUT /api/chat/delivered/:sender_id — the caller received what `sender_id` sent.
pub async fn mark_delivered(
    State(state): State<AppState>,
    user: AuthUser,
    Path(sender_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    receipt_partner(&user, &sender_id)?;
    let ids = state
        .hub()
        .acknowledge_delivered(&user.user_id, &sender_id)
        .await?;
    Ok(Json(json!({ "ok": true, "messageIds": ids })))
}

/// PUT /api/chat/seen/:sender_id — the caller read what `sender_id` sent.
pub async fn mark_seen(
    State(state): State<AppState>,
    user: AuthUser,
    Path(sender_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    receipt_partner(&user, &sender_id)?;
    let ids = state.hub().acknowledge_seen(&user.user_id, &sender_id).await?;
    Ok(Json(json!({ "ok": true, "messageIds": ids })))
}

/// GET /api/chat/admin — who shoppers should open a chat with.
pub async fn admin_contact(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let admin_id = state
        .admin_user_id
        .as_deref()
        .ok_or_else(|| AppError::NotFound("no store admin configured".to_string()))?;
    let online = state.hub().presence().is_online(admin_id).await;
    Ok(Json(json!({ "adminId": admin_id, "online": online })))
}

/// GET /health — liveness probe. Fails when the database is unreachable.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let connections = state.hub().presence().connection_count().await;
    let Some(pool) = state.db() else {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "storefront-live",
                "store": "memory",
                "connections": connections
            })),
        );
    };
    match crate::db::ping(pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "storefront-live",
                "store": "postgres",
                "connections": connections
            })),
        ),
        Err(e) => {
            warn!(error = %e, "health check: database unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "service": "storefront-live", "store": "postgres" })),
            )
        }
    }
}
