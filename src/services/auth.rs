//! Identity checks for socket registration.
//!
//! A socket may present a session token when it connects. A later `register`
//! must agree with it; without a token the asserted user id is trusted unless
//! `require_register_token` is set.

use crate::auth::JwtSecret;
use crate::error::{AppError, AppResult};
use crate::models::{Identity, Role};
use tracing::debug;

#[derive(Clone)]
pub struct AuthService {
    jwt: JwtSecret,
    require_register_token: bool,
}

impl AuthService {
    pub fn new(jwt: JwtSecret, require_register_token: bool) -> Self {
        Self {
            jwt,
            require_register_token,
        }
    }

    pub fn jwt(&self) -> &JwtSecret {
        &self.jwt
    }

    /// Resolve a connect-time token. Invalid tokens are treated as absent.
    pub fn identify(&self, token: Option<&str>) -> Option<Identity> {
        let token = token.map(str::trim).filter(|t| !t.is_empty())?;
        match self.jwt.validate(token) {
            Ok(claims) => Some(Identity {
                user_id: claims.sub,
                role: claims.role,
            }),
            Err(e) => {
                debug!(error = %e, "connect token rejected");
                None
            }
        }
    }

    /// Decide whether `user_id` may register on a connection with `verified`
    /// identity. Returns the effective role.
    pub fn authorize_register(
        &self,
        verified: Option<&Identity>,
        user_id: &str,
        asserted: Option<Role>,
    ) -> AppResult<Role> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation("userId required".to_string()));
        }
        match verified {
            Some(identity) if identity.user_id != user_id => Err(AppError::Auth(format!(
                "token belongs to {}, not {}",
                identity.user_id, user_id
            ))),
            Some(identity) => Ok(identity.role.or(asserted).unwrap_or_default()),
            None if self.require_register_token => {
                Err(AppError::Auth("register requires a session token".to_string()))
            }
            // Unverified sockets never get admin.
            None => Ok(Role::User),
        }
    }
}
