//! WebSocket handler: origin check, token lookup, and the per-socket read loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::middleware::auth::session_token;
use crate::models::Identity;

const HEADER_ORIGIN: &str = "origin";

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Upgrade HTTP to WebSocket. Checks the Origin against the allow-list and
/// resolves an optional session token before upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let origin = headers
        .get(HEADER_ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase());
    if let Some(origin) = &origin {
        if !origin_allowed(&state.allowed_origins, origin) {
            return Err(AppError::Forbidden(format!("origin {} not allowed", origin)));
        }
    }

    let token = params.token.or_else(|| session_token(&headers));
    let identity = state.hub().auth().identify(token.as_deref());

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, identity)))
}

/// Parse host from Origin header (e.g. "https://app.example.com" -> "app.example.com").
pub(crate) fn parse_origin_host(origin: &str) -> Option<String> {
    let u = origin.strip_prefix("https://").or_else(|| origin.strip_prefix("http://"))?;
    let host = u.split('/').next()?.to_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(host)
}

/// Check if origin host matches allowed host (exact, or `*.example.com` for
/// the apex and any subdomain on a label boundary).
pub(crate) fn host_matches(allowed: &str, origin_host: &str) -> bool {
    let allowed = allowed.trim().to_lowercase();
    if allowed.starts_with('*') {
        let suffix = allowed.trim_start_matches('*').trim_start_matches('.');
        if suffix.is_empty() {
            return false;
        }
        origin_host == suffix || origin_host.ends_with(&format!(".{}", suffix))
    } else {
        allowed == origin_host
    }
}

/// Entries are full origins (`https://shop.example.com`), bare or wildcard
/// hosts (`*.example.com`), or `*`. An empty list allows everything.
pub fn origin_allowed(allowed: &[String], origin: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = parse_origin_host(origin) else {
        return false;
    };
    allowed.iter().any(|entry| {
        let entry = entry.trim();
        if entry == "*" {
            return true;
        }
        let allowed_host = parse_origin_host(entry).unwrap_or_else(|| entry.to_lowercase());
        host_matches(&allowed_host, &host)
    })
}

async fn handle_socket(state: AppState, socket: WebSocket, identity: Option<Identity>) {
    let hub = state.hub().clone();
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let conn = hub.open(tx, identity).await;

    // Frames are handled one at a time, each to completion.
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => hub.handle_frame(&conn, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.close(&conn).await;
    send_task.abort();
    info!(connection_id = %conn, "ws disconnected");
}
