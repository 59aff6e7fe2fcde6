//! Authentication module.
//!
//! Token *verification* only: the handshake hands this module a JWT pulled
//! off the upgrade request and gets back verified claims. Token issuance
//! belongs to the rest of the platform.

mod claims;
mod config;
mod error;
mod state;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError};
pub use error::AuthError;
pub use state::AuthState;
