use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::session::SessionId;

/// JWT claims for a session token. The token is bound to exactly one
/// session id; there are no user accounts behind it.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // session id
    pub exp: i64,    // expiry (unix timestamp)
    pub iat: i64,    // issued at
}

/// Why token verification failed. Exposed to clients as a stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    ValidationError,
    InvalidFormat,
    SignatureMismatch,
    Expired,
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::ValidationError => "validation_error",
            TokenError::InvalidFormat => "invalid_format",
            TokenError::SignatureMismatch => "signature_mismatch",
            TokenError::Expired => "expired",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            TokenError::ValidationError => "Token validation error",
            TokenError::InvalidFormat => "Invalid token format",
            TokenError::SignatureMismatch => "Invalid token signature",
            TokenError::Expired => "Token expired",
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Create a signed session token bound to the given session id.
pub fn generate_session_token(
    session_id: SessionId,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: session_id.to_string(),
        exp: (now + Duration::seconds(ttl_secs)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a session token and return the session id it is bound to.
pub fn verify_session_token(token: &str, secret: &str) -> Result<SessionId, TokenError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::SignatureMismatch,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
            TokenError::InvalidFormat
        }
        _ => TokenError::ValidationError,
    })?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| TokenError::ValidationError)
}
