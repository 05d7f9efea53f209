//! Request authentication: session token extractors and the app-key check.

use axum::http::{request::Parts, HeaderMap};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie, HeaderMapExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::models::{Role, UserId};

pub const HEADER_APP_KEY: &str = "x-app-key";
/// Cookie the storefront sets its session token in.
pub const TOKEN_COOKIE: &str = "token";

/// Session token from `Authorization: Bearer` or the `token` cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }
    headers
        .typed_get::<Cookie>()
        .and_then(|c| c.get(TOKEN_COOKIE).map(str::to_string))
}

/// Extractor: caller identity from a verified session token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

#[axum::async_trait]
impl axum::extract::FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| AppError::Auth("Missing session token".to_string()))?;
        let claims = state.jwt_secret().validate(&token)?;
        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role.unwrap_or_default(),
        })
    }
}

/// Extractor: like `AuthUser` but the role must be admin.
#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl axum::extract::FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            debug!(user_id = %user.user_id, "admin route refused");
            return Err(AppError::Forbidden("admin role required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Compare two secrets in constant time: both are MACed under the same key and
/// the tags checked with `verify_slice`.
fn secrets_match(given: &str, expected: &str) -> Result<bool, AppError> {
    let tag = |secret: &str| -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(expected.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init: {}", e)))?;
        mac.update(secret.as_bytes());
        Ok(mac)
    };
    let expected_tag = tag(expected)?.finalize().into_bytes();
    Ok(tag(given)?.verify_slice(&expected_tag).is_ok())
}

/// Require `x-app-key` to equal the configured key (server-to-server calls).
pub fn require_app_key(headers: &HeaderMap, app_key: &str) -> Result<(), AppError> {
    let key = headers
        .get(HEADER_APP_KEY)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if key.is_empty() || app_key.is_empty() || !secrets_match(key, app_key)? {
        debug!("rejected request: invalid or missing x-app-key");
        return Err(AppError::Auth("invalid or missing x-app-key".to_string()));
    }
    Ok(())
}
