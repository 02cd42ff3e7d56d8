//! Real-time channel message envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Every `type` value the real-time channel understands.
///
/// The set is closed: a frame with any other `type` fails to parse and is
/// dropped by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Client keepalive.
    Ping,
    /// Server acknowledgement of a keepalive.
    Pong,
    /// Server acknowledgement of a new connection.
    Connected,
    SubscriptionUpdated,
    SubscriptionExpired,
    PaymentSucceeded,
    PaymentFailed,
    BalanceUpdated,
    Notification,
}

impl MessageKind {
    /// Transport-control kinds are consumed by the channel and never reach
    /// the consumer.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            MessageKind::Ping | MessageKind::Pong | MessageKind::Connected
        )
    }
}

/// A JSON text frame: `{ "type": ..., ...payload }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Map::new(),
        }
    }

    /// The keepalive frame sent by the client.
    pub fn ping() -> Self {
        Self::new(MessageKind::Ping)
    }

    /// Adds a payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Returns a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_serializes_to_bare_type() {
        assert_eq!(Envelope::ping().to_text().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn payload_fields_are_flattened() {
        let envelope =
            Envelope::parse(r#"{"type":"payment_failed","payment_id":"p-1","reason":"card"}"#)
                .unwrap();
        assert_eq!(envelope.kind, MessageKind::PaymentFailed);
        assert_eq!(envelope.get("payment_id"), Some(&json!("p-1")));
        assert!(envelope.get("type").is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Envelope::parse(r#"{"type":"subscribe_all"}"#).is_err());
        assert!(Envelope::parse(r#"{"kind":"pong"}"#).is_err());
    }

    #[test]
    fn control_kinds() {
        assert!(MessageKind::Pong.is_control());
        assert!(MessageKind::Connected.is_control());
        assert!(!MessageKind::Notification.is_control());
        assert!(!MessageKind::SubscriptionUpdated.is_control());
    }
}
