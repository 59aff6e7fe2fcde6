//! User resolution.
//!
//! The handshake must resolve a verified token subject to a known user row;
//! a token for a deleted or never-provisioned user is refused.

mod repository;

pub use repository::UserRepository;

/// A user known to the push service.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}
