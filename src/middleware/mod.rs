//! Shared HTTP auth extractors. Socket identity is resolved in the ws handler.

pub mod auth;

pub use auth::{require_app_key, session_token, AdminUser, AuthUser};
