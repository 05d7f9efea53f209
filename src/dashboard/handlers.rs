//! Admin dashboard HTTP handlers: visitor statistics and live presence.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::middleware::auth::AdminUser;
use crate::models::UserId;
use crate::services::VisitorReport;

const MAX_HISTORY_DAYS: u32 = 365;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
}

/// GET /api/admin/visitor-stats?days=7
pub async fn visitor_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<StatsQuery>,
) -> Result<Json<VisitorReport>, AppError> {
    let days = q
        .days
        .unwrap_or(state.stats_history_days)
        .clamp(1, MAX_HISTORY_DAYS);
    let active = state.hub().presence().visitor_count().await;
    let report = state.hub().stats().report(days, active).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub online_users: Vec<UserId>,
    pub active_visitors: usize,
    pub connections: usize,
}

/// GET /api/admin/presence
pub async fn presence(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<PresenceResponse>, AppError> {
    let presence = state.hub().presence();
    Ok(Json(PresenceResponse {
        online_users: presence.online_users().await,
        active_visitors: presence.visitor_count().await,
        connections: presence.connection_count().await,
    }))
}
