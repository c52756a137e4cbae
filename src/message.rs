//! Wire types for the client message channel (`spec.md` §3, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel topic every client is implicitly subscribed to on join
/// (`spec.md` §3, Open Question 1 — resolved in DESIGN.md).
pub const BROADCAST_ALL: &str = "BROADCAST_ALL";

/// Topic. Pattern: decoded DMX packets are published here (`spec.md` §4.G)
pub const ARTNET_DMX_TOPIC: &str = "artnet/dmx_packet";

pub type Topic = String;

/// Inbound control frame from a client: `{"type": "subscribe"|"unsubscribe", "topic": "..."}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        topic: String,
        #[serde(default)]
        #[allow(dead_code)]
        payload: Option<Value>,
    },
    Unsubscribe {
        topic: String,
        #[serde(default)]
        #[allow(dead_code)]
        payload: Option<Value>,
    },
}

/// Outbound envelope: `{"Type": ..., "Data": ..., "Timestamp": ms}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Data")]
    pub data: Value,
    #[serde(rename = "Timestamp")]
    pub timestamp_ms: i64,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>, data: Value, timestamp_ms: i64) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_subscribe_envelope() {
        let json = r#"{"type":"subscribe","topic":"artnet/dmx_packet"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe { topic, .. } => assert_eq!(topic, "artnet/dmx_packet"),
            _ => panic!("expected Subscribe"),
        }
    }

    #[test]
    fn ignores_unknown_payload_field() {
        let json = r#"{"type":"unsubscribe","topic":"t","payload":{"anything":1}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { .. }));
    }

    #[test]
    fn outbound_message_serializes_with_capitalized_keys() {
        let msg = OutboundMessage::new("artnet_dmx_packet", serde_json::json!({"Length": 3}), 42);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["Type"], "artnet_dmx_packet");
        assert_eq!(json["Timestamp"], 42);
        assert_eq!(json["Data"]["Length"], 3);
    }
}
