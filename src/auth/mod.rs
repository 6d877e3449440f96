pub mod password;
pub mod token;
pub mod validation;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::models::Role;
use self::token::{TokenError, TokenService};

/// Caller identity taken from the access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id_number: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require_role(&self, allowed: &[Role], detail: &str) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::warn!(
                "Permission denied: {} has role {}, needs one of {:?}",
                self.id_number,
                self.role,
                allowed
            );
            Err(ApiError::Forbidden(detail.to_string()))
        }
    }
}

/// Router state able to verify access tokens.
pub trait TokenAuthority {
    fn token_service(&self) -> &TokenService;
}

/// Accepts `Bearer <token>` as well as a bare token; the web client sends
/// the latter.
fn token_from_header(value: &str) -> Option<&str> {
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: TokenAuthority + Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(token_from_header)
            .ok_or(ApiError::Unauthorized)?;

        let claims = state.token_service().verify(token).map_err(|e| {
            tracing::info!("Rejected access token: {}", e);
            match e {
                TokenError::Expired => ApiError::TokenExpired,
                TokenError::Invalid => ApiError::Unauthorized,
            }
        })?;

        Ok(AuthUser {
            id_number: claims.id_number,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_forms() {
        assert_eq!(token_from_header("Bearer abc.def"), Some("abc.def"));
        assert_eq!(token_from_header("abc.def"), Some("abc.def"));
        assert_eq!(token_from_header("Bearer "), None);
        assert_eq!(token_from_header(""), None);
    }

    #[test]
    fn role_gate() {
        let user = AuthUser {
            id_number: "A123456789".into(),
            role: Role::User,
        };
        assert!(user.require_role(&[Role::User], "x").is_ok());
        assert!(matches!(
            user.require_role(&[Role::HealthCenter, Role::Other], "x"),
            Err(ApiError::Forbidden(_))
        ));
    }
}
