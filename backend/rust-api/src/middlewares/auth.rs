use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::handlers::error::ApiError;
use crate::services::AppState;

/// Claims of an access token issued by the store's auth service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String, // user id
    pub aud: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Token issued for another audience")]
    InvalidAudience,
}

/// Verifies HS256 tokens; issuing them is the auth service's job.
pub struct JwtService {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                _ => AuthError::InvalidToken,
            })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Verifies the bearer token and stores its claims in request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers).map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let jwt_service = JwtService::new(&state.config.auth.jwt_secret, &state.config.auth.audience);
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        ApiError::unauthorized(e.to_string())
    })?;

    tracing::debug!("Authenticated user: {}", claims.sub);

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, aud: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: "5b0c6c1e-user".to_string(),
            aud: aud.to_string(),
            role: Some("authenticated".to_string()),
            email: Some("aluno@example.com".to_string()),
            exp: (now + exp_offset) as usize,
            iat: Some(now as usize),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_supabase_token() {
        let service = JwtService::new("test-secret", "authenticated");
        let claims = service
            .validate_token(&token("test-secret", "authenticated", 3600))
            .unwrap();
        assert_eq!(claims.sub, "5b0c6c1e-user");
    }

    #[test]
    fn rejects_wrong_secret_audience_and_expiry() {
        let service = JwtService::new("test-secret", "authenticated");
        assert!(matches!(
            service.validate_token(&token("other", "authenticated", 3600)),
            Err(AuthError::InvalidSignature)
        ));
        assert!(matches!(
            service.validate_token(&token("test-secret", "anon", 3600)),
            Err(AuthError::InvalidAudience)
        ));
        assert!(matches!(
            service.validate_token(&token("test-secret", "authenticated", -3600)),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::MissingToken)));
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }
}
