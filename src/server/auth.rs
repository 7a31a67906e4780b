//! Signed bearer tokens.
//!
//! Tokens are HS256 JWTs carrying a numeric `user_id` claim. The claim may be
//! encoded either as a JSON number or as a string of digits.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::state::ServerState;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token does not carry a valid user id")]
    InvalidUserId,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: Value,
    exp: u64,
}

fn parse_user_id(claim: &Value) -> Result<u64, AuthError> {
    match claim {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .ok_or(AuthError::InvalidUserId),
        Value::String(s) => s.trim().parse().map_err(|_| AuthError::InvalidUserId),
        _ => Err(AuthError::InvalidUserId),
    }
}

/// Verifies (and, for tooling and tests, issues) bearer tokens.
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode `token` and return the user id it was issued for.
    pub fn verify(&self, token: &str) -> Result<u64, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        parse_user_id(&data.claims.user_id)
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: u64, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: Value::from(user_id),
            exp: Utc::now().timestamp().max(0) as u64 + ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Authenticated caller, taken from the `Authorization: Bearer` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: u64,
}

impl FromRequestParts<ServerState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(AuthError::MissingToken)?;

        let user_id = ctx.token_verifier.verify(token).inspect_err(|e| {
            debug!("Rejected bearer token: {}", e);
        })?;
        Ok(AuthUser { user_id })
    }
}
