//! JWT claims.

use serde::{Deserialize, Serialize};

/// Claims carried by the tokens this service verifies.
///
/// Only `sub` and `exp` matter to the handshake; the rest are accepted so
/// tokens minted elsewhere in the platform validate without stripping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the numeric user id, as a string.
    pub sub: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// User's email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// User's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Claims {
    /// Claims for a user id with the given lifetime in seconds.
    pub fn for_user(user_id: i64, ttl_secs: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            exp: now + ttl_secs,
            iat: Some(now),
            iss: None,
            email: None,
            name: None,
        }
    }
}
