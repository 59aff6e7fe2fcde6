//! Authentication errors.
//!
//! Every variant maps to the same client-visible outcome at handshake time:
//! a bare 401 and a destroyed socket. The distinctions exist for logging.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No token in the query string or cookies.
    #[error("missing auth token")]
    MissingToken,

    /// Signature or structural validation failed.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token expired.
    #[error("token expired")]
    TokenExpired,

    /// Token verified but the referenced user cannot be resolved.
    #[error("unknown user")]
    UnknownUser,

    /// Internal error.
    #[error("internal auth error: {0}")]
    Internal(String),
}
