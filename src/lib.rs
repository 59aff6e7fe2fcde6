//! Pling notification push service.
//!
//! This library provides the core components for delivering real-time
//! notifications to connected clients over a from-scratch WebSocket layer:
//! the frame codec, the upgrade handshake, the per-user connection hub, and
//! the notification dispatcher.

pub mod auth;
pub mod db;
pub mod notify;
pub mod user;
pub mod ws;
