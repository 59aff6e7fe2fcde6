//! Notification persistence and real-time dispatch.
//!
//! Producers call [`NotificationService::create_notification`]; everything
//! that decides *when* to notify lives elsewhere. Persistence is the
//! authoritative step, delivery is best-effort fan-out through the hub.

mod models;
mod repository;
mod service;

pub use models::{NewNotification, Notification, NotificationKind};
pub use repository::NotificationRepository;
pub use service::NotificationService;
