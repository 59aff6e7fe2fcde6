//! Notification records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type-specific category of a notification; drives which `data` payload
/// clients expect (typically including an `action_url`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TradeOffer,
    NewMessage,
    OrderUpdate,
    ListingApproved,
    ListingRejected,
    PaymentComplete,
    PriceAlert,
    System,
    Security,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TradeOffer => "trade_offer",
            NotificationKind::NewMessage => "new_message",
            NotificationKind::OrderUpdate => "order_update",
            NotificationKind::ListingApproved => "listing_approved",
            NotificationKind::ListingRejected => "listing_rejected",
            NotificationKind::PaymentComplete => "payment_complete",
            NotificationKind::PriceAlert => "price_alert",
            NotificationKind::System => "system",
            NotificationKind::Security => "security",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trade_offer" => Ok(NotificationKind::TradeOffer),
            "new_message" => Ok(NotificationKind::NewMessage),
            "order_update" => Ok(NotificationKind::OrderUpdate),
            "listing_approved" => Ok(NotificationKind::ListingApproved),
            "listing_rejected" => Ok(NotificationKind::ListingRejected),
            "payment_complete" => Ok(NotificationKind::PaymentComplete),
            "price_alert" => Ok(NotificationKind::PriceAlert),
            "system" => Ok(NotificationKind::System),
            "security" => Ok(NotificationKind::Security),
            other => Err(format!("unknown notification kind: {}", other)),
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted notification. Authoritative regardless of whether any
/// real-time delivery succeeded.
///
/// Serializes to the wire shape clients consume:
/// `{id, type, title, body, data, read_at, created_at}`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub read_at: Option<String>,
    pub created_at: String,
}

/// Input to [`crate::notify::NotificationService::create_notification`].
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Value,
    /// Attempt real-time fan-out after persisting. Defaults to true.
    pub send_real_time: bool,
}

impl NewNotification {
    pub fn new(
        user_id: i64,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            data,
            send_real_time: true,
        }
    }

    /// Persist only, skip the real-time delivery attempt.
    pub fn without_real_time(mut self) -> Self {
        self.send_real_time = false;
        self
    }
}
