use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Merchant,
    Admin,
}

/// Bearer token claims. Tokens are issued by the external session service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Authorization header must use Bearer token format")]
    InvalidScheme,
    #[error("JWT secret not configured")]
    SecretNotConfigured,
    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),
}

/// Authenticated principal context extracted from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrincipal {
    pub principal_id: String,
    pub role: Role,
}

impl AuthPrincipal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn actor(&self) -> Actor {
        Actor {
            id: self.principal_id.clone(),
            admin: self.is_admin(),
        }
    }
}

impl From<Claims> for AuthPrincipal {
    fn from(claims: Claims) -> Self {
        Self {
            principal_id: claims.sub,
            role: claims.role,
        }
    }
}

/// Extract the token from an `Authorization: Bearer …` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;
    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        Some(_) => Err(AuthError::InvalidToken("empty token".to_string())),
        None => Err(AuthError::InvalidScheme),
    }
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::SecretNotConfigured);
    }
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let token_data = decode::<Claims>(token, &decoding_key, &Validation::default())
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    if token_data.claims.sub.trim().is_empty() {
        return Err(AuthError::InvalidToken("empty subject".to_string()));
    }
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(sub: &str, role: Role, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims { sub: sub.to_string(), role, exp: now + exp_offset, iat: now };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"s3cret")).unwrap()
    }

    #[test]
    fn test_verify_roundtrip() {
        let claims = verify_jwt(&token("u1", Role::Admin, 600), "s3cret").unwrap();
        let principal = AuthPrincipal::from(claims);
        assert!(principal.is_admin());
        assert_eq!(principal.actor(), Actor::admin("u1"));
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired() {
        assert!(matches!(verify_jwt(&token("u1", Role::Merchant, 600), "other"), Err(AuthError::InvalidToken(_))));
        assert!(matches!(verify_jwt(&token("u1", Role::Merchant, -600), "s3cret"), Err(AuthError::InvalidToken(_))));
        assert_eq!(verify_jwt("x", ""), Err(AuthError::SecretNotConfigured));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), Err(AuthError::InvalidScheme));
        assert_eq!(bearer_token(None), Err(AuthError::MissingHeader));
    }
}
