//! Outbound application envelopes.
//!
//! Everything the server pushes to a client is one of these, serialized as
//! JSON into a single text frame.

use serde::Serialize;

/// Server-to-client envelope.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent<T: Serialize> {
    /// Session is ready; sent exactly once after a successful handshake.
    Connected,

    /// A notification addressed to this connection's user.
    Notification { data: T },
}

impl ServerEvent<()> {
    /// The `{"type":"connected"}` confirmation payload.
    pub fn connected_json() -> String {
        serde_json::to_string(&ServerEvent::<()>::Connected)
            .expect("connected envelope serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_envelope_shape() {
        assert_eq!(ServerEvent::connected_json(), r#"{"type":"connected"}"#);
    }

    #[test]
    fn notification_envelope_shape() {
        let event = ServerEvent::Notification {
            data: serde_json::json!({"id": 1}),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"notification","data":{"id":1}}"#
        );
    }
}
