//! Identifiers and identity attached to live connections.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User id as issued by the storefront auth API.
pub type UserId = String;
/// Live transport session id.
pub type ConnectionId = String;
/// Durable message id.
pub type MessageId = String;

/// Role a registered connection acts under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Identity proven by a verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Option<Role>,
}

/// Generate a unique connection id.
pub fn generate_connection_id() -> ConnectionId {
    format!("{}.{}", std::process::id(), Uuid::new_v4().as_simple())
}
