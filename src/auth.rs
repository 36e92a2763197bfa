//! Bearer-token authentication.
//!
//! Token issuance lives in the external auth service; this side only
//! validates the JWT and exposes the caller's identity to handlers.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::AppState;

/// JWT claims as issued by the auth service
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: patient or doctor id
    pub sub: Uuid,
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }

    pub fn is_doctor(&self) -> bool {
        self.has_role("doctor")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| ServiceError::Unauthorized("malformed authorization header".into()))?;

        let claims = validate_token(token, &app_state.config.jwt_secret)?;

        Ok(AuthUser {
            user_id: claims.sub,
            roles: claims.roles,
        })
    }
}

/// Decodes and validates a bearer token against the shared secret.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))
}

/// Issues a token for the given subject. The real issuer is the external
/// auth service; this helper exists for tests and local tooling.
pub fn issue_token(
    user_id: Uuid,
    roles: &[&str],
    secret: &str,
    ttl_secs: i64,
) -> Result<String, ServiceError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now,
        exp: now + ttl_secs,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("token encoding failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates() {
        let user_id = Uuid::new_v4();
        let token = issue_token(user_id, &["patient"], "secret", 3600).unwrap();
        let claims = validate_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.roles, vec!["patient".to_string()]);
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_token(Uuid::new_v4(), &["patient"], "secret", 3600).unwrap();
        assert!(validate_token(&token, "other").is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let token = issue_token(Uuid::new_v4(), &["patient"], "secret", -3600).unwrap();
        assert!(validate_token(&token, "secret").is_err());
    }

    #[test]
    fn role_helpers() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            roles: vec!["doctor".into()],
        };
        assert!(user.is_doctor());
        assert!(!user.is_admin());
    }
}
