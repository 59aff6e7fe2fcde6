//! From-scratch WebSocket layer.
//!
//! The wire protocol (RFC 6455 framing, HTTP upgrade handshake) is
//! implemented here rather than taken from a socket library; the seam
//! between this protocol plumbing and the hub/dispatcher pub-sub logic is
//! deliberate and kept narrow.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Browser clients                       │
//! │   GET /ws/notifications (token via query or cookie)        │
//! └───────────────────────────┬────────────────────────────────┘
//!                             │ TCP
//! ┌───────────────────────────▼────────────────────────────────┐
//! │  listener — upgrade routing, auth, 101/401                 │
//! │  connection — frame codec + send/close/pong                │
//! │  hub — user id -> live connections                         │
//! └───────────────────────────▲────────────────────────────────┘
//!                             │ fan-out
//!                  NotificationService (notify)
//! ```

pub mod connection;
pub mod frame;
pub mod handshake;
pub mod hub;
pub mod listener;
mod types;

pub use connection::{Connection, ReadyState};
pub use hub::Hub;
pub use listener::WsServer;
pub use types::ServerEvent;

use thiserror::Error;

/// Errors at the WebSocket layer. All of them are handled locally by
/// closing the offending connection; none crash the process.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Frame(#[from] frame::FrameError),
}
