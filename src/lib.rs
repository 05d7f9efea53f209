//! Real-time chat and presence core for a storefront.
//!
//! One WebSocket per browser tab: presence of registered users, a live
//! active-visitor count, direct messages with `sent -> delivered -> seen`
//! receipts, and daily visitor/order statistics.

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::{ChatHub, PresenceService};

use axum::routing::{get, post, put};
use handlers::http;

/// Build the API router (ws, chat history, order events, admin, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let chat_routes = axum::Router::new()
        .route("/conversations", get(http::conversations))
        .route("/messages/:other_user_id", get(http::messages))
        .route("/delivered/:sender_id", put(http::mark_delivered))
        .route("/seen/:sender_id", put(http::mark_seen))
        .route("/admin", get(http::admin_contact));

    let admin_routes = axum::Router::new()
        .route("/visitor-stats", get(dashboard::visitor_stats))
        .route("/presence", get(dashboard::presence));

    axum::Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/api/events/order", post(http::record_order))
        .route("/health", get(http::health))
        .nest("/api/chat", chat_routes)
        .nest("/api/admin", admin_routes)
        .with_state(state)
}
