//! Token verification state.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use log::warn;
use std::sync::Arc;

use super::{AuthConfig, AuthError, Claims};

/// Verification state shared across handshakes.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Create new auth state from config.
    /// Resolves `env:VAR_NAME` syntax in jwt_secret at construction time.
    pub fn new(mut config: AuthConfig) -> Self {
        if let Ok(Some(resolved)) = config.resolve_jwt_secret() {
            config.jwt_secret = Some(resolved);
        }

        let decoding_key = config
            .jwt_secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self {
            config: Arc::new(config),
            decoding_key,
        }
    }

    /// Validate a JWT and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear(); // Allow missing iss/aud

        let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            warn!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(token_data.claims)
    }

    /// Mint a token for a user id. Used by tests and the operator CLI; the
    /// platform's own login flow issues production tokens.
    pub fn generate_token(&self, user_id: i64, ttl_secs: i64) -> Result<String, AuthError> {
        use jsonwebtoken::{EncodingKey, Header, encode};

        let secret = self
            .config
            .jwt_secret
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        encode(
            &Header::default(),
            &Claims::for_user(user_id, ttl_secs),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }
}
